use clap::Parser;
use evac_map::HashMap;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Number of draws for the first-key distribution comparison.
    #[arg(short = 't', long = "trials", default_value_t = 10_000)]
    trials: usize,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashMap with target capacity: {}",
        args.target_capacity
    );

    let mut map: HashMap<u64, u64> = HashMap::with_capacity(args.target_capacity);

    println!("Actual capacity: {}", map.capacity());
    println!("Filling map past its capacity with u64 values...");

    let mut num_failures = 0;
    let num_values = map.capacity() + 1;
    for i in 0..num_values {
        let value = i as u64;
        if map.try_insert(value, value).is_err() {
            num_failures += 1;
        }
    }

    println!("Inserted {} values into map", map.len());
    println!("Growth in progress: {}", map.is_growing());
    map.debug_stats().print();

    let histogram = map.as_table().chain_histogram();
    println!("=== Chain Length Histogram ===");
    for (length, count) in histogram.iter().enumerate().skip(1) {
        if *count > 0 {
            println!("{length:>3} buckets: {count}");
        }
    }
    println!("Number of failed try_insert attempts: {}", num_failures);

    let pair: HashMap<usize, usize> = [(0, 0), (1, 1)].into_iter().collect();
    let mut rng = rand::rng();

    let mut range_counts = [0usize; 2];
    for _ in 0..args.trials {
        if let Some((&k, _)) = pair.iter_with_rng(&mut rng).next() {
            range_counts[k] += 1;
        }
    }

    let mut random_counts = [0usize; 2];
    for _ in 0..args.trials {
        if let Some((&k, _)) = pair.random_entry(&mut rng) {
            random_counts[k] += 1;
        }
    }

    println!("=== First Key Over {} Trials ===", args.trials);
    println!("Using iter:         {:?}", range_counts);
    println!("Using random_entry: {:?}", random_counts);
}
