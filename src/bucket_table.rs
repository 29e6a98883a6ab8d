use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::mem;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use crate::bucket::BUCKET_SIZE;
use crate::bucket::Bucket;
use crate::bucket::EVACUATED_EMPTY;
use crate::bucket::EVACUATED_LOWER;
use crate::bucket::EVACUATED_UPPER;
use crate::bucket::Slot;
use crate::bucket::SlotRef;
use crate::bucket::Status;
use crate::bucket::tag;
use crate::error::Error;
use crate::error::Result;
use crate::trace::debug;
use crate::trace::trace;

/// Average bucket load (13/2 = 6.5 entries) that triggers growth.
const LOAD_FACTOR_NUM: usize = 13;
const LOAD_FACTOR_DEN: usize = 2;

static NEXT_TABLE_ID: AtomicUsize = AtomicUsize::new(1);

#[inline]
fn next_table_id() -> usize {
    NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed)
}

#[inline(always)]
fn over_load_factor(count: usize, log2: u8) -> bool {
    count > BUCKET_SIZE
        && count > LOAD_FACTOR_NUM.saturating_mul((1usize << log2) / LOAD_FACTOR_DEN)
}

fn log2_for(count: usize) -> u8 {
    let mut log2 = 0;
    while over_load_factor(count, log2) {
        log2 += 1;
    }
    log2
}

/// Returns `true` if `key` equals itself.
///
/// Keys failing this (NaN-like keys) can be stored and iterated, but never
/// looked up, and they are relocated during growth by the low bit of their
/// tag instead of by their hash.
#[allow(clippy::eq_op)]
#[inline(always)]
pub(crate) fn is_reflexive<K: PartialEq>(key: &K) -> bool {
    key == key
}

/// A bucket array: `2^log2` consecutive buckets starting at `base` in the
/// arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BucketArray {
    pub(crate) base: usize,
    pub(crate) log2: u8,
}

impl BucketArray {
    #[inline(always)]
    pub(crate) fn len(self) -> usize {
        1 << self.log2
    }

    #[inline(always)]
    pub(crate) fn mask(self) -> usize {
        self.len() - 1
    }

    #[inline(always)]
    pub(crate) fn head(self, index: usize) -> usize {
        self.base + index
    }
}

/// Debug statistics for bucket table analysis.
///
/// Available in tests and with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of entries currently in the table
    pub populated: usize,
    /// Number of entries the table holds before growing
    pub capacity: usize,
    /// Number of buckets in the current array
    pub buckets: usize,
    /// Overflow buckets linked from live arrays
    pub overflow_buckets: usize,
    /// Arena buckets kept only as forwarding records for old cursors
    pub retired_buckets: usize,
    /// `(evacuated, total)` old buckets while a growth is in progress
    pub growth: Option<(usize, usize)>,
    /// Load factor (populated / (buckets * BUCKET_SIZE))
    pub load_factor: f64,
    /// Average number of buckets per chain in the current array
    pub average_chain: f64,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Bucket Table Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% slot load)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Buckets: {} primary, {} overflow ({:.2} per chain)",
            self.buckets, self.overflow_buckets, self.average_chain
        );
        println!("Retired: {} buckets", self.retired_buckets);
        match self.growth {
            Some((done, total)) => println!("Growth: {done}/{total} old buckets evacuated"),
            None => println!("Growth: idle"),
        }
    }
}

/// A hash table of `(K, V)` entries that grows incrementally.
///
/// When the average bucket load crosses 6.5 entries the table allocates an
/// array of twice as many buckets, then every subsequent write moves exactly
/// one bucket of the old array across. Lookups consult whichever half still
/// holds a key's entries, and [`Cursor`](crate::cursor::Cursor)s remain
/// correct while the move is in flight.
///
/// Every bucket lives in one arena. Overflow buckets are appended to it and
/// linked by index, and the arrays a growth retires stay in it as forwarding
/// records until the table is cleared, drained or shrunk.
///
/// The table is not internally synchronized. Writers need `&mut self`, so any
/// number of readers may share it while no write happens.
///
/// ## Example
///
/// ```rust
/// # use evac_map::bucket_table::BucketTable;
/// # use std::hash::RandomState;
/// #
/// let mut table = BucketTable::with_capacity_and_hasher(8, RandomState::new());
/// for k in 0..100u32 {
///     table.try_insert(k, k * 2).unwrap();
/// }
/// assert_eq!(table.lookup(&42), Some(&84));
/// assert_eq!(table.len(), 100);
/// ```
pub struct BucketTable<K, V, S> {
    arena: Vec<Bucket<K, V>>,
    current: BucketArray,
    old: Option<BucketArray>,
    nevacuate: usize,
    len: usize,
    id: usize,
    hash_builder: S,
}

impl<K: Clone, V: Clone, S: Clone> Clone for BucketTable<K, V, S> {
    /// Clones every entry. Cursors of the source do not carry over to the
    /// clone.
    fn clone(&self) -> Self {
        Self {
            arena: self.arena.clone(),
            current: self.current,
            old: self.old,
            nevacuate: self.nevacuate,
            len: self.len,
            id: next_table_id(),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K, V, S> Debug for BucketTable<K, V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;

        let mut rows = Vec::new();
        if !self.arena.is_empty() {
            for index in 0..self.current.len() {
                let mut next = Some(self.current.head(index));
                let mut row = String::new();
                while let Some(b) = next {
                    if !row.is_empty() {
                        row.push_str(" -> ");
                    }
                    for (i, s) in self.arena[b].status.iter().enumerate() {
                        if i > 0 {
                            row.push(' ');
                        }
                        match Status::of(*s) {
                            Status::Empty => row.push_str(".."),
                            Status::EvacuatedEmpty => row.push_str("e_"),
                            Status::EvacuatedLower => row.push_str("eL"),
                            Status::EvacuatedUpper => row.push_str("eU"),
                            Status::Filled(t) => row.push_str(&format!("{t:02x}")),
                        }
                    }
                    next = self.arena[b].overflow;
                }
                rows.push(row);
            }
        }

        f.debug_struct("BucketTable")
            .field("len", &self.len)
            .field("log2_buckets", &self.current.log2)
            .field("growing", &self.old.is_some())
            .field("nevacuate", &self.nevacuate)
            .field("arena", &self.arena.len())
            .field("buckets", &rows)
            .finish()
    }
}

impl<K, V, S> BucketTable<K, V, S> {
    /// Creates an empty table using `hash_builder` to hash keys.
    ///
    /// No buckets are allocated until the first insert.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty table sized to hold at least `capacity` entries
    /// before its first growth.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            arena: Vec::new(),
            current: BucketArray {
                base: 0,
                log2: log2_for(capacity),
            },
            old: None,
            nevacuate: 0,
            len: 0,
            id: next_table_id(),
            hash_builder,
        }
    }

    /// Returns a reference to the table's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of entries the current bucket array holds before the next
    /// growth is triggered.
    pub fn capacity(&self) -> usize {
        BUCKET_SIZE.max(LOAD_FACTOR_NUM.saturating_mul(self.current.len() / LOAD_FACTOR_DEN))
    }

    /// Base-2 logarithm of the current bucket count.
    pub fn log2_buckets(&self) -> u8 {
        self.current.log2
    }

    /// Returns `true` while an old bucket array is still being evacuated.
    pub fn is_growing(&self) -> bool {
        self.old.is_some()
    }

    /// `(nevacuate, old bucket count)` while a growth is in progress. Every
    /// old bucket below `nevacuate` is guaranteed to be evacuated.
    pub fn evacuation_progress(&self) -> Option<(usize, usize)> {
        self.old.map(|old| (self.nevacuate, old.len()))
    }

    /// Removes every entry. The bucket count is kept, but the memory of
    /// retired arrays is released and existing cursors are exhausted.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.reset(self.current.log2);
    }

    /// Removes every entry, returning them in arena order.
    ///
    /// Existing cursors are exhausted.
    pub fn drain(&mut self) -> Drain<K, V> {
        let remaining = self.len;
        let arena = mem::take(&mut self.arena);
        self.reset(self.current.log2);
        Drain {
            buckets: arena.into_iter(),
            slots: None,
            remaining,
        }
    }

    fn reset(&mut self, log2: u8) {
        self.current = BucketArray { base: 0, log2 };
        self.old = None;
        self.nevacuate = 0;
        self.len = 0;
        self.id = next_table_id();
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn current_array(&self) -> BucketArray {
        self.current
    }

    pub(crate) fn old_array(&self) -> Option<BucketArray> {
        self.old
    }

    pub(crate) fn bucket(&self, index: usize) -> Option<&Bucket<K, V>> {
        self.arena.get(index)
    }

    /// Resolves a slot to the entry stored there, following forwarding
    /// records left by evacuation.
    pub(crate) fn follow(&self, mut at: SlotRef) -> Option<(&K, &V)> {
        loop {
            match &self.arena.get(at.bucket)?.slots[at.index] {
                Slot::Occupied(k, v) => return Some((k, v)),
                Slot::Moved(to) => at = *to,
                Slot::Vacant => return None,
            }
        }
    }

    fn chain(&self, head: usize) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(Some(head), move |&b| self.arena[b].overflow)
    }

    fn ensure_allocated(&mut self) -> Result<()> {
        if self.arena.is_empty() {
            let buckets = self.current.len();
            self.arena.try_reserve_exact(buckets)?;
            self.arena.extend((0..buckets).map(|_| Bucket::new()));
        }
        Ok(())
    }

    /// Stores an entry in the first empty slot of the chain starting at
    /// `head`, linking a fresh overflow bucket when the chain is full.
    fn place(&mut self, head: usize, top: u8, key: K, value: V) -> Result<SlotRef> {
        let mut b = head;
        loop {
            if let Some(index) = self.arena[b].first_empty() {
                let bucket = &mut self.arena[b];
                bucket.status[index] = top;
                bucket.slots[index] = Slot::Occupied(key, value);
                return Ok(SlotRef { bucket: b, index });
            }

            match self.arena[b].overflow {
                Some(next) => b = next,
                None => {
                    self.arena.try_reserve(1)?;
                    let next = self.arena.len();
                    self.arena.push(Bucket::new());
                    self.arena[b].overflow = Some(next);
                    trace!(bucket = b, overflow = next, "linked overflow bucket");
                    b = next;
                }
            }
        }
    }

    /// Doubles the bucket count and schedules the previous array for
    /// evacuation.
    fn trigger_growth(&mut self) -> Result<()> {
        debug_assert!(self.old.is_none(), "growth already in progress");

        let log2 = self.current.log2 + 1;
        let buckets = 1usize
            .checked_shl(u32::from(log2))
            .ok_or(Error::CapacityExceeded)?;
        self.arena.try_reserve_exact(buckets)?;

        let base = self.arena.len();
        self.arena.extend((0..buckets).map(|_| Bucket::new()));
        self.old = Some(self.current);
        self.current = BucketArray { base, log2 };
        self.nevacuate = 0;

        debug!(len = self.len, log2_buckets = log2, "growth started");
        Ok(())
    }

    fn advance_evacuation_mark(&mut self, old: BucketArray) {
        self.nevacuate += 1;
        while self.nevacuate < old.len() && self.arena[old.head(self.nevacuate)].is_evacuated() {
            self.nevacuate += 1;
        }

        if self.nevacuate == old.len() {
            self.old = None;
            debug!(
                len = self.len,
                log2_buckets = self.current.log2,
                "growth finished"
            );
        }
    }

    /// Checks that an un-evacuated chain is consistent and returns its length.
    fn validate_chain(&self, head: usize) -> Result<usize> {
        let mut length = 0;
        for b in self.chain(head) {
            length += 1;
            let bucket = &self.arena[b];
            for (status, slot) in bucket.status.iter().zip(bucket.slots.iter()) {
                match (Status::of(*status), slot) {
                    (Status::Empty, Slot::Vacant) | (Status::Filled(_), Slot::Occupied(..)) => {}
                    (Status::Empty | Status::Filled(_), _) => {
                        return Err(Error::InvariantViolation {
                            bucket: b,
                            reason: "status byte disagrees with slot contents",
                        });
                    }
                    _ => {
                        return Err(Error::InvariantViolation {
                            bucket: b,
                            reason: "chain is partially evacuated",
                        });
                    }
                }
            }
        }
        Ok(length)
    }

    #[cfg(any(test, feature = "stats"))]
    fn live_buckets(&self) -> (usize, usize) {
        let mut primary = 0;
        let mut overflow = 0;
        for array in core::iter::once(self.current).chain(self.old) {
            primary += array.len();
            for index in 0..array.len() {
                overflow += self.chain(array.head(index)).count() - 1;
            }
        }
        (primary, overflow)
    }

    /// Returns debug statistics about the table's layout.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let buckets = self.current.len();
        let (overflow_buckets, retired_buckets, current_overflow) = if self.arena.is_empty() {
            (0, 0, 0)
        } else {
            let (primary, overflow) = self.live_buckets();
            let current_overflow = (0..buckets)
                .map(|index| self.chain(self.current.head(index)).count() - 1)
                .sum::<usize>();
            (overflow, self.arena.len() - primary - overflow, current_overflow)
        };

        DebugStats {
            populated: self.len,
            capacity: self.capacity(),
            buckets,
            overflow_buckets,
            retired_buckets,
            growth: self.old.map(|old| {
                let done = (0..old.len())
                    .filter(|&index| self.arena[old.head(index)].is_evacuated())
                    .count();
                (done, old.len())
            }),
            load_factor: self.len as f64 / (buckets * BUCKET_SIZE) as f64,
            average_chain: (buckets + current_overflow) as f64 / buckets as f64,
        }
    }

    /// Returns a histogram of chain lengths in the current array, where index
    /// `i` counts the chains made of `i` buckets.
    #[cfg(any(test, feature = "stats"))]
    pub fn chain_histogram(&self) -> Vec<usize> {
        let mut histogram = Vec::new();
        if self.arena.is_empty() {
            return histogram;
        }
        for index in 0..self.current.len() {
            let length = self.chain(self.current.head(index)).count();
            if histogram.len() <= length {
                histogram.resize(length + 1, 0);
            }
            histogram[length] += 1;
        }
        histogram
    }
}

impl<K, V, S> BucketTable<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    #[inline]
    pub(crate) fn hash(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Locates the slot holding `key`. Consults the old array when the key's
    /// old bucket has not been evacuated yet.
    fn find(&self, hash: u64, key: &K) -> Option<SlotRef> {
        if self.len == 0 {
            return None;
        }

        let mut head = self.current.head(hash as usize & self.current.mask());
        if let Some(old) = self.old {
            let old_head = old.head(hash as usize & old.mask());
            if !self.arena[old_head].is_evacuated() {
                head = old_head;
            }
        }

        let top = tag(hash);
        for b in self.chain(head) {
            let bucket = &self.arena[b];
            for index in 0..BUCKET_SIZE {
                if bucket.status[index] != top {
                    continue;
                }
                if let Slot::Occupied(k, _) = &bucket.slots[index]
                    && k == key
                {
                    return Some(SlotRef { bucket: b, index });
                }
            }
        }
        None
    }

    /// Returns the value stored for `key`.
    ///
    /// A key that does not equal itself is never found.
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.lookup_key_value(key).map(|(_, v)| v)
    }

    /// Returns the stored key and value for `key`.
    pub fn lookup_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let at = self.find(self.hash(key), key)?;
        match &self.arena[at.bucket].slots[at.index] {
            Slot::Occupied(k, v) => Some((k, v)),
            _ => None,
        }
    }

    /// Returns a mutable reference to the value stored for `key`.
    pub fn lookup_mut(&mut self, key: &K) -> Option<&mut V> {
        let at = self.find(self.hash(key), key)?;
        match &mut self.arena[at.bucket].slots[at.index] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    /// Inserts `value` for `key`, returning the previous value if the key was
    /// present.
    ///
    /// While a growth is in progress, the write first evacuates exactly one
    /// old bucket: the one `key` hashes to if it is still outstanding,
    /// otherwise the lowest outstanding one.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExceeded`] if a bucket could not be allocated, in
    /// which case `key` and `value` are dropped and the table still holds
    /// every entry it held before.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        let hash = self.hash(&key);
        self.ensure_allocated()?;
        self.grow_work(hash)?;

        if let Some(at) = self.find(hash, &key) {
            return match &mut self.arena[at.bucket].slots[at.index] {
                Slot::Occupied(_, v) => Ok(Some(mem::replace(v, value))),
                _ => Err(Error::InvariantViolation {
                    bucket: at.bucket,
                    reason: "matched slot holds no entry",
                }),
            };
        }

        if self.old.is_none() && over_load_factor(self.len + 1, self.current.log2) {
            self.trigger_growth()?;
            self.grow_work(hash)?;
        }

        let head = self.current.head(hash as usize & self.current.mask());
        self.place(head, tag(hash), key, value)?;
        self.len += 1;
        Ok(None)
    }

    fn grow_work(&mut self, hash: u64) -> Result<()> {
        let Some(old) = self.old else {
            return Ok(());
        };
        let target = hash as usize & old.mask();
        let bucket = if self.arena[old.head(target)].is_evacuated() {
            self.nevacuate
        } else {
            target
        };
        self.evacuate(bucket)
    }

    /// Moves every entry of old bucket `old_bucket` (and its overflow chain)
    /// into the lower or upper destination bucket of the current array.
    ///
    /// Calling this on an already evacuated bucket, or when no growth is in
    /// progress, does nothing.
    ///
    /// # Errors
    ///
    /// [`Error::InvariantViolation`] if `old_bucket` is out of range or its
    /// chain is inconsistent, and [`Error::CapacityExceeded`] if destination
    /// overflow buckets cannot be reserved. Either way nothing has been moved
    /// and the bucket can be evacuated again later.
    pub fn evacuate(&mut self, old_bucket: usize) -> Result<()> {
        let Some(old) = self.old else {
            return Ok(());
        };
        if old_bucket >= old.len() {
            return Err(Error::InvariantViolation {
                bucket: old_bucket,
                reason: "old bucket index out of range",
            });
        }

        let head = old.head(old_bucket);
        if self.arena[head].is_evacuated() {
            return Ok(());
        }

        // Each destination chain needs at most as many buckets as the source
        // chain, and its primary bucket already exists.
        let length = self.validate_chain(head)?;
        self.arena.try_reserve(2 * (length - 1))?;

        let newbit = old.len();
        let lower = self.current.head(old_bucket);
        let upper = self.current.head(old_bucket + newbit);

        let mut next = Some(head);
        while let Some(b) = next {
            for index in 0..BUCKET_SIZE {
                let Status::Filled(top) = Status::of(self.arena[b].status[index]) else {
                    self.arena[b].status[index] = EVACUATED_EMPTY;
                    continue;
                };
                let Slot::Occupied(key, value) = mem::take(&mut self.arena[b].slots[index]) else {
                    unreachable!("chain validated before evacuation");
                };

                let (to_upper, top) = if is_reflexive(&key) {
                    (self.hash_builder.hash_one(&key) & newbit as u64 != 0, top)
                } else {
                    // The direction comes from the old tag; the fresh tag
                    // decides the next growth.
                    (top & 1 == 1, tag(self.hash_builder.hash_one((top, b, index))))
                };
                let to = self.place(if to_upper { upper } else { lower }, top, key, value)?;

                let bucket = &mut self.arena[b];
                bucket.status[index] = if to_upper {
                    EVACUATED_UPPER
                } else {
                    EVACUATED_LOWER
                };
                bucket.slots[index] = Slot::Moved(to);
            }
            next = self.arena[b].overflow;
        }
        trace!(old_bucket, chain = length, "evacuated bucket");

        if old_bucket == self.nevacuate {
            self.advance_evacuation_mark(old);
        }
        Ok(())
    }

    /// Evacuates every outstanding old bucket, completing any growth in
    /// progress.
    pub fn finish_growth(&mut self) -> Result<()> {
        while self.old.is_some() {
            self.evacuate(self.nevacuate)?;
        }
        Ok(())
    }

    /// Rebuilds the arena at the smallest bucket count that holds the current
    /// entries, completing any growth and releasing retired arrays.
    ///
    /// Existing cursors are exhausted.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExceeded`] if the new arena cannot be allocated; the
    /// table is unchanged in that case.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        let log2 = log2_for(self.len);
        // A chain only grows an overflow bucket once its tail holds a full
        // bucket of entries.
        let buckets = (1usize << log2) + self.len / BUCKET_SIZE + 1;
        let mut arena = Vec::new();
        arena.try_reserve_exact(buckets)?;
        arena.extend((0..1usize << log2).map(|_| Bucket::new()));

        let len = self.len;
        let previous = mem::replace(&mut self.arena, arena);
        self.reset(log2);
        for bucket in previous {
            for slot in bucket.slots {
                if let Slot::Occupied(key, value) = slot {
                    let hash = self.hash(&key);
                    let head = self.current.head(hash as usize & self.current.mask());
                    self.place(head, tag(hash), key, value)?;
                    self.len += 1;
                }
            }
        }
        debug_assert_eq!(self.len, len);

        debug!(len, log2_buckets = log2, arena = self.arena.len(), "arena rebuilt");
        Ok(())
    }
}

/// An owning iterator over the entries removed from a [`BucketTable`].
///
/// Created by [`BucketTable::drain`].
pub struct Drain<K, V> {
    buckets: alloc::vec::IntoIter<Bucket<K, V>>,
    slots: Option<core::array::IntoIter<Slot<K, V>, BUCKET_SIZE>>,
    remaining: usize,
}

impl<K, V> Iterator for Drain<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(slots) = &mut self.slots {
                for slot in slots.by_ref() {
                    if let Slot::Occupied(k, v) = slot {
                        self.remaining -= 1;
                        return Some((k, v));
                    }
                }
            }
            self.slots = Some(self.buckets.next()?.slots.into_iter());
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Drain<K, V> {}

#[cfg(test)]
mod tests {
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Clone)]
    struct SipHashBuilder {
        k0: u64,
        k1: u64,
    }

    impl SipHashBuilder {
        fn random() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    /// Sends every key to the same bucket with the same tag.
    #[derive(Clone, Default)]
    struct Collide;

    struct CollideHasher;

    impl Hasher for CollideHasher {
        fn finish(&self) -> u64 {
            0xA5A5_0000_0000_0000
        }

        fn write(&mut self, _: &[u8]) {}
    }

    impl BuildHasher for Collide {
        type Hasher = CollideHasher;

        fn build_hasher(&self) -> Self::Hasher {
            CollideHasher
        }
    }

    /// A float key: NaN never equals itself.
    #[derive(Debug, Clone, Copy)]
    struct Float(f64);

    impl PartialEq for Float {
        fn eq(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }

    impl Hash for Float {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.0.to_bits().hash(state);
        }
    }

    type Layout = Vec<([u8; BUCKET_SIZE], Option<usize>)>;

    fn layout<K, V, S>(table: &BucketTable<K, V, S>) -> Layout {
        table
            .arena
            .iter()
            .map(|b| (b.status, b.overflow))
            .collect()
    }

    fn evacuated_old_buckets<K, V, S>(table: &BucketTable<K, V, S>) -> usize {
        table.old.map_or(0, |old| {
            (0..old.len())
                .filter(|&i| table.arena[old.head(i)].is_evacuated())
                .count()
        })
    }

    /// Inserts sequential keys starting at `from` until a growth starts.
    fn fill_until_growing<S: BuildHasher>(table: &mut BucketTable<u64, u64, S>, from: u64) -> u64 {
        let mut k = from;
        while !table.is_growing() {
            table.try_insert(k, k * 10).unwrap();
            k += 1;
        }
        k
    }

    #[test]
    fn insert_and_lookup() {
        let mut table = BucketTable::with_hasher(SipHashBuilder::random());
        for k in 0..1000u64 {
            assert_eq!(table.try_insert(k, k * 2).unwrap(), None);
            assert_eq!(table.lookup(&k), Some(&(k * 2)), "{table:#?}");
        }
        assert_eq!(table.len(), 1000);
        for k in 0..1000u64 {
            assert_eq!(table.lookup(&k), Some(&(k * 2)));
        }
        assert_eq!(table.lookup(&5000), None);
    }

    #[test]
    fn overwrite_returns_previous_value() {
        let mut table = BucketTable::with_hasher(SipHashBuilder::random());
        assert_eq!(table.try_insert(7u64, "a").unwrap(), None);
        assert_eq!(table.try_insert(7u64, "b").unwrap(), Some("a"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&7), Some(&"b"));

        *table.lookup_mut(&7).unwrap() = "c";
        assert_eq!(table.lookup_key_value(&7), Some((&7, &"c")));
    }

    #[test]
    fn empty_table_allocates_nothing() {
        let table: BucketTable<u64, u64, _> = BucketTable::with_hasher(SipHashBuilder::random());
        assert!(table.is_empty());
        assert!(table.arena.is_empty());
        assert_eq!(table.lookup(&1), None);
        assert_eq!(table.capacity(), BUCKET_SIZE);
    }

    #[test]
    fn with_capacity_presizes_buckets() {
        let table: BucketTable<u64, u64, _> =
            BucketTable::with_capacity_and_hasher(100, SipHashBuilder::random());
        assert!(table.capacity() >= 100);
        assert_eq!(table.log2_buckets(), 4);

        let small: BucketTable<u64, u64, _> =
            BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        assert_eq!(small.log2_buckets(), 0);
    }

    #[test]
    fn growth_triggers_past_load_factor() {
        let mut table = BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        for k in 0..8u64 {
            table.try_insert(k, k).unwrap();
        }
        assert_eq!(table.log2_buckets(), 0);
        assert!(!table.is_growing());

        // A single old bucket is evacuated by the very write that grows it.
        table.try_insert(8, 8).unwrap();
        assert_eq!(table.log2_buckets(), 1);
        assert!(!table.is_growing());

        for k in 9..13u64 {
            table.try_insert(k, k).unwrap();
        }
        assert_eq!(table.log2_buckets(), 1);
        table.try_insert(13, 13).unwrap();
        assert_eq!(table.log2_buckets(), 2);
        assert!(table.is_growing());
    }

    #[test]
    fn each_write_evacuates_exactly_one_bucket() {
        let mut table = BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        let mut next = 0u64;
        while table.log2_buckets() < 4 || !table.is_growing() {
            table.try_insert(next, next).unwrap();
            next += 1;
        }
        let (_, old_len) = table.evacuation_progress().unwrap();
        assert_eq!(evacuated_old_buckets(&table), 1);

        let mut expected = 1;
        let mut overwrite = 0u64;
        while table.is_growing() {
            // Overwrites drive evacuation just like new keys.
            table.try_insert(overwrite, overwrite + 1).unwrap();
            overwrite += 1;
            expected += 1;
            if table.is_growing() {
                assert_eq!(evacuated_old_buckets(&table), expected);
            }
        }
        assert_eq!(expected, old_len);
        for k in 0..next {
            let want = if k < overwrite { k + 1 } else { k };
            assert_eq!(table.lookup(&k), Some(&want));
        }
    }

    #[test]
    fn lookup_during_growth_sees_both_arrays() {
        let mut table = BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        while table.log2_buckets() < 5 || !table.is_growing() {
            let k = table.len() as u64;
            table.try_insert(k, k * 10).unwrap();
        }
        assert!(evacuated_old_buckets(&table) < table.evacuation_progress().unwrap().1);
        for k in 0..table.len() as u64 {
            assert_eq!(table.lookup(&k), Some(&(k * 10)), "{table:#?}");
        }
    }

    #[test]
    fn nevacuate_only_advances_past_evacuated_buckets() {
        let mut table = BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        while table.log2_buckets() < 4 || !table.is_growing() {
            let k = table.len() as u64;
            table.try_insert(k, k).unwrap();
        }
        let old = table.old.unwrap();

        // Evacuate from the top down; nevacuate must wait for the bottom.
        for index in (1..old.len()).rev() {
            table.evacuate(index).unwrap();
            if let Some((nevacuate, _)) = table.evacuation_progress() {
                for below in 0..nevacuate {
                    assert!(table.arena[old.head(below)].is_evacuated());
                }
            }
        }
        table.evacuate(0).unwrap();
        assert!(!table.is_growing());
        for k in 0..table.len() as u64 {
            assert_eq!(table.lookup(&k), Some(&k));
        }
    }

    #[test]
    fn evacuate_is_idempotent() {
        let mut table = BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        while table.log2_buckets() < 4 || !table.is_growing() {
            let k = table.len() as u64;
            table.try_insert(k, k).unwrap();
        }
        let old = table.old.unwrap();
        let index = (0..old.len())
            .find(|&i| table.arena[old.head(i)].is_evacuated())
            .unwrap();

        let before = layout(&table);
        let progress = table.evacuation_progress();
        let len = table.len();

        table.evacuate(index).unwrap();
        table.evacuate(index).unwrap();

        assert_eq!(layout(&table), before);
        assert_eq!(table.evacuation_progress(), progress);
        assert_eq!(table.len(), len);
    }

    #[test]
    fn evacuate_out_of_range_is_rejected() {
        let mut table = BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        fill_until_growing(&mut table, 0);
        let (_, old_len) = table.evacuation_progress().unwrap();
        assert!(matches!(
            table.evacuate(old_len),
            Err(Error::InvariantViolation { .. })
        ));

        // Without a growth in flight evacuation is a no-op.
        table.finish_growth().unwrap();
        assert_eq!(table.evacuate(0), Ok(()));
    }

    #[test]
    fn mixed_chain_is_an_invariant_violation() {
        let mut table = BucketTable::with_capacity_and_hasher(0, Collide);
        // Twelve colliding keys fill one bucket and spill into an overflow.
        for k in 0..12u64 {
            table.try_insert(k, k).unwrap();
        }
        let head = table.current.head(0);
        let overflow = table.arena[head].overflow.unwrap();
        table.arena[overflow].status[BUCKET_SIZE - 1] = EVACUATED_EMPTY;
        table.trigger_growth().unwrap();
        let before = layout(&table);

        assert_eq!(
            table.evacuate(0),
            Err(Error::InvariantViolation {
                bucket: overflow,
                reason: "chain is partially evacuated",
            })
        );
        assert_eq!(layout(&table), before);
        assert_eq!(table.evacuation_progress(), Some((0, 2)));
    }

    #[test]
    fn colliding_keys_chain_and_survive_growth() {
        let mut table = BucketTable::with_capacity_and_hasher(0, Collide);
        for k in 0..200u64 {
            table.try_insert(k, k + 1).unwrap();
        }
        table.finish_growth().unwrap();
        for k in 0..200u64 {
            assert_eq!(table.lookup(&k), Some(&(k + 1)));
        }
        let histogram = table.chain_histogram();
        // One long chain holds everything, every other bucket is a lone head.
        assert_eq!(histogram[1], (1 << table.log2_buckets()) - 1);
        assert_eq!(histogram[200usize.div_ceil(BUCKET_SIZE)], 1);
    }

    #[test]
    fn non_reflexive_keys_are_stored_but_not_found() {
        let mut table = BucketTable::with_hasher(SipHashBuilder::random());
        assert_eq!(table.try_insert(Float(f64::NAN), 1).unwrap(), None);
        assert_eq!(table.try_insert(Float(f64::NAN), 2).unwrap(), None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(&Float(f64::NAN)), None);

        for i in 0..100 {
            table.try_insert(Float(i as f64), i).unwrap();
        }
        table.finish_growth().unwrap();
        assert_eq!(table.len(), 102);

        let mut drained = table.drain().map(|(_, v)| v).collect::<Vec<_>>();
        drained.sort_unstable();
        let mut expected = (0..100).collect::<Vec<_>>();
        expected.extend([1, 2]);
        expected.sort_unstable();
        assert_eq!(drained, expected);
    }

    #[test]
    fn non_reflexive_keys_are_retagged_and_spread() {
        let mut table = BucketTable::with_capacity_and_hasher(0, SipHashBuilder::random());
        // Identical NaNs share a hash, so they start out in a single chain.
        for _ in 0..64 {
            table.try_insert(Float(f64::NAN), 0u8).unwrap();
        }
        table.finish_growth().unwrap();
        assert!(table.log2_buckets() >= 3);

        let mut directions = [0usize; 2];
        for bucket in &table.arena {
            for (i, s) in bucket.status.iter().enumerate() {
                let status = Status::of(*s);
                if status.is_relocated() {
                    let Slot::Moved(_) = bucket.slots[i] else {
                        panic!("relocated slot without forwarding link");
                    };
                    directions[usize::from(s & 1)] += 1;
                }
            }
        }
        // Only the first growth sends every NaN the same way.
        assert!(directions[0] > 0 && directions[1] > 0, "{directions:?}");

        let populated_chains = (0..table.current.len())
            .filter(|&i| {
                let mut next = Some(table.current.head(i));
                while let Some(b) = next {
                    if table.arena[b].slots.iter().any(|s| matches!(s, Slot::Occupied(..))) {
                        return true;
                    }
                    next = table.arena[b].overflow;
                }
                false
            })
            .count();
        assert!(populated_chains > 1, "{table:#?}");
    }

    #[test]
    fn clear_and_reuse() {
        let mut table = BucketTable::with_hasher(SipHashBuilder::random());
        for k in 0..300u64 {
            table.try_insert(k, k).unwrap();
        }
        let log2 = table.log2_buckets();
        let id = table.id();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.log2_buckets(), log2);
        assert_ne!(table.id(), id);
        assert_eq!(table.lookup(&3), None);

        table.try_insert(3, 4).unwrap();
        assert_eq!(table.lookup(&3), Some(&4));
    }

    #[test]
    fn clone_is_independent() {
        let mut table = BucketTable::with_hasher(SipHashBuilder::random());
        for k in 0..60u64 {
            table.try_insert(k, k).unwrap();
        }
        let mut copy = table.clone();
        assert_ne!(copy.id(), table.id());
        copy.try_insert(1, 100).unwrap();
        assert_eq!(table.lookup(&1), Some(&1));
        assert_eq!(copy.lookup(&1), Some(&100));
        assert_eq!(copy.len(), table.len());
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table = BucketTable::with_hasher(SipHashBuilder::random());
        for k in 0..100u64 {
            table.try_insert(k, k * 3).unwrap();
        }
        let drain = table.drain();
        assert_eq!(drain.len(), 100);
        let mut entries = drain.collect::<Vec<_>>();
        entries.sort_unstable();
        assert_eq!(entries, (0..100u64).map(|k| (k, k * 3)).collect::<Vec<_>>());
        assert!(table.is_empty());
        assert_eq!(table.lookup(&1), None);
    }

    #[test]
    fn shrink_to_fit_releases_retired_arrays() {
        let mut table = BucketTable::with_hasher(SipHashBuilder::random());
        for k in 0..500u64 {
            table.try_insert(k, k).unwrap();
        }
        assert!(table.debug_stats().retired_buckets > 0);

        table.shrink_to_fit().unwrap();
        let stats = table.debug_stats();
        assert_eq!(stats.retired_buckets, 0);
        assert_eq!(stats.growth, None);
        assert_eq!(stats.populated, 500);
        assert_eq!(table.log2_buckets(), log2_for(500));
        for k in 0..500u64 {
            assert_eq!(table.lookup(&k), Some(&k));
        }
    }

    #[cfg(all(feature = "tracing", feature = "std"))]
    #[test]
    fn growth_and_rebuild_emit_events() {
        use std::io;
        use std::sync::Arc;
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Capture(Arc<Mutex<Vec<u8>>>);

        impl io::Write for Capture {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut table = BucketTable::with_capacity_and_hasher(0, Collide);
            for k in 0..40u64 {
                table.try_insert(k, k).unwrap();
            }
            table.finish_growth().unwrap();
            table.shrink_to_fit().unwrap();
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        for event in [
            "growth started",
            "evacuated bucket",
            "growth finished",
            "linked overflow bucket",
            "arena rebuilt",
        ] {
            assert!(output.contains(event), "missing {event:?} in:\n{output}");
        }
        assert!(output.contains("evac_map"));
    }

    #[test]
    fn debug_stats_track_growth() {
        let mut table = BucketTable::with_capacity_and_hasher(8, SipHashBuilder::random());
        assert_eq!(table.debug_stats().populated, 0);
        fill_until_growing(&mut table, 0);

        let stats = table.debug_stats();
        let (done, total) = stats.growth.unwrap();
        assert!(done >= 1 && done < total);
        assert_eq!(stats.buckets, 2 * total);
        assert_eq!(stats.populated, table.len());
        assert!(stats.load_factor > 0.0);
        assert!(stats.average_chain >= 1.0);

        let histogram = table.chain_histogram();
        assert_eq!(histogram.iter().sum::<usize>(), stats.buckets);
        assert_eq!(histogram.first(), Some(&0));
    }
}
