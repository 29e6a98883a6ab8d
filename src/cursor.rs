use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;

use rand::Rng;
use rand::RngCore;

use crate::bucket::BUCKET_SHIFT;
use crate::bucket::BUCKET_SIZE;
use crate::bucket::SlotRef;
use crate::bucket::Status;
use crate::bucket_table::BucketArray;
use crate::bucket_table::BucketTable;
use crate::bucket_table::is_reflexive;

/// Lifecycle of a [`Cursor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    /// Created over a non-empty table, nothing yielded yet.
    Initialized,
    /// At least one step taken and the traversal has not wrapped yet.
    Scanning,
    /// Every bucket has been visited, or the table was cleared or rebuilt.
    Exhausted,
}

/// A detached position in a randomized traversal of a [`BucketTable`].
///
/// Use [`Cursor::advance`] with the table the cursor was created from. Using
/// it with any other table exhausts it.
///
/// # Examples
///
/// ```rust
/// # use evac_map::bucket_table::BucketTable;
/// # use evac_map::cursor::Cursor;
/// # use rand::SeedableRng;
/// # use rand::rngs::SmallRng;
/// # use std::hash::RandomState;
/// #
/// let mut table = BucketTable::with_hasher(RandomState::new());
/// for k in 0..40u32 {
///     table.try_insert(k, ()).unwrap();
/// }
///
/// let mut rng = SmallRng::seed_from_u64(7);
/// let mut cursor = Cursor::new(&table, &mut rng);
/// let mut seen = 0;
/// let mut next = 1000;
/// while let Some((&k, _)) = cursor.advance(&table) {
///     assert!(k < 40 || k >= 1000);
///     seen += 1;
///     // Writes may be interleaved with the traversal.
///     table.try_insert(next, ()).unwrap();
///     next += 1;
/// }
/// assert!(seen >= 40);
/// ```
#[derive(Clone, Debug)]
pub struct Cursor {
    table_id: usize,
    array: BucketArray,
    start_bucket: usize,
    offset: usize,
    bucket: usize,
    current: Option<usize>,
    slot: usize,
    wrapped: bool,
    check_bucket: Option<usize>,
    state: CursorState,
}

impl Cursor {
    /// Starts a traversal of `table` at a position drawn from `rng`.
    ///
    /// The cursor snapshots the table's current bucket array. A cursor over
    /// an empty table is exhausted immediately.
    pub fn new<K, V, S, R>(table: &BucketTable<K, V, S>, rng: &mut R) -> Self
    where
        R: RngCore + ?Sized,
    {
        let array = table.current_array();
        let mut cursor = Self {
            table_id: table.id(),
            array,
            start_bucket: 0,
            offset: 0,
            bucket: 0,
            current: None,
            slot: 0,
            wrapped: false,
            check_bucket: None,
            state: CursorState::Exhausted,
        };
        if table.is_empty() {
            return cursor;
        }

        let mut r = u64::from(rng.next_u32());
        if u32::from(array.log2) > 31 - BUCKET_SHIFT {
            r += u64::from(rng.next_u32()) << 31;
        }
        cursor.start_bucket = (r & array.mask() as u64) as usize;
        cursor.offset = ((r >> array.log2) & (BUCKET_SIZE as u64 - 1)) as usize;
        cursor.bucket = cursor.start_bucket;
        cursor.state = CursorState::Initialized;
        cursor
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Returns `true` once the traversal is over.
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Bucket index the traversal started at.
    pub fn start_bucket(&self) -> usize {
        self.start_bucket
    }

    /// Slot offset every bucket is scanned from.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Yields the next entry, or `None` once every bucket has been visited.
    pub fn advance<'t, K, V, S>(&mut self, table: &'t BucketTable<K, V, S>) -> Option<(&'t K, &'t V)>
    where
        K: Hash + PartialEq,
        S: BuildHasher,
    {
        if self.state == CursorState::Exhausted {
            return None;
        }
        if table.id() != self.table_id {
            self.state = CursorState::Exhausted;
            return None;
        }
        self.state = CursorState::Scanning;

        loop {
            let b = match self.current {
                Some(b) => b,
                None => {
                    if self.bucket == self.start_bucket && self.wrapped {
                        self.state = CursorState::Exhausted;
                        return None;
                    }
                    let b = self.select_bucket(table);
                    self.current = Some(b);
                    self.slot = 0;
                    b
                }
            };

            let Some(bucket) = table.bucket(b) else {
                self.state = CursorState::Exhausted;
                return None;
            };

            while self.slot < BUCKET_SIZE {
                let index = (self.slot + self.offset) & (BUCKET_SIZE - 1);
                self.slot += 1;

                let byte = bucket.status[index];
                let status = Status::of(byte);
                if status.is_vacant() {
                    continue;
                }
                let Some((key, value)) = table.follow(SlotRef { bucket: b, index }) else {
                    continue;
                };
                let reflexive = is_reflexive(key);

                if let Some(check) = self.check_bucket {
                    // Walking an old bucket on behalf of new bucket `check`:
                    // skip entries bound for its sibling.
                    let destination = if reflexive {
                        table.hash(key) as usize & self.array.mask()
                    } else {
                        (check & !(1 << (self.array.log2 - 1)))
                            | (usize::from(byte & 1) << (self.array.log2 - 1))
                    };
                    if destination != check {
                        continue;
                    }
                }

                if status.is_relocated() && reflexive {
                    // The slot was evacuated after this bucket was chosen; the
                    // live entry is wherever the current table keeps it.
                    match table.lookup_key_value(key) {
                        Some(entry) => return Some(entry),
                        None => continue,
                    }
                }
                return Some((key, value));
            }

            self.current = bucket.overflow;
            self.slot = 0;
        }
    }

    /// Picks the arena bucket to walk for the next bucket index and advances
    /// the index, wrapping at the end of the snapshotted array.
    fn select_bucket<K, V, S>(&mut self, table: &BucketTable<K, V, S>) -> usize {
        let index = self.bucket;
        let (head, check) = match table.old_array() {
            // Started after the growth began: this bucket may still be filled
            // from its old bucket, so walk that instead and filter.
            Some(old) if self.array.log2 == table.current_array().log2 => {
                let old_head = old.head(index & old.mask());
                if table.bucket(old_head).is_some_and(|b| !b.is_evacuated()) {
                    (old_head, Some(index))
                } else {
                    (self.array.head(index), None)
                }
            }
            _ => (self.array.head(index), None),
        };
        self.check_bucket = check;

        self.bucket += 1;
        if self.bucket == self.array.len() {
            self.bucket = 0;
            self.wrapped = true;
        }
        head
    }
}

/// A borrowing iterator over the entries of a [`BucketTable`], in randomized
/// order.
///
/// Created by [`BucketTable::iter_with_rng`].
pub struct Iter<'a, K, V, S> {
    table: &'a BucketTable<K, V, S>,
    cursor: Cursor,
    remaining: usize,
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cursor.advance(self.table)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, S> ExactSizeIterator for Iter<'_, K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
}

impl<K, V, S> FusedIterator for Iter<'_, K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
}

impl<K, V, S> BucketTable<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    /// Starts a detached [`Cursor`] over the table.
    pub fn cursor<R: RngCore + ?Sized>(&self, rng: &mut R) -> Cursor {
        Cursor::new(self, rng)
    }

    /// Returns an iterator over every entry, starting at a position drawn
    /// from `rng`.
    pub fn iter_with_rng<R: RngCore + ?Sized>(&self, rng: &mut R) -> Iter<'_, K, V, S> {
        Iter {
            table: self,
            cursor: Cursor::new(self, rng),
            remaining: self.len(),
        }
    }

    /// Picks an entry uniformly at random.
    ///
    /// A traversal's first entry depends on its random start but is not
    /// uniform over the entries; advancing a fresh traversal a uniformly
    /// drawn number of steps is.
    pub fn random_entry<R: RngCore + ?Sized>(&self, rng: &mut R) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        let mut iter = self.iter_with_rng(rng);
        let steps = rng.random_range(0..self.len());
        iter.nth(steps)
    }
}
