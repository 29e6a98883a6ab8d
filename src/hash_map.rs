use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::ops::Index;

use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::DefaultHashBuilder;
use crate::bytes::AsBytes;
use crate::bucket_table::BucketTable;
#[cfg(any(test, feature = "stats"))]
use crate::bucket_table::DebugStats;
pub use crate::bucket_table::Drain;
use crate::cursor::Cursor;
pub use crate::cursor::Iter;
use crate::error::Error;
use crate::error::Result;

/// Seed of the traversal used where the order of entries is not observable.
const FIXED_ORDER_SEED: u64 = 0x5EED;

#[cold]
#[inline(never)]
fn allocation_failed(error: Error) -> ! {
    panic!("{error}")
}

/// A hash map that grows incrementally and iterates in randomized order.
///
/// `HashMap<K, V, S>` stores key-value pairs in a [`BucketTable`]. Keys need
/// only `Hash + PartialEq`: a key that is not equal to itself (such as a NaN
/// float) can be inserted and iterated, but never looked up.
///
/// # Iteration order
///
/// Each traversal starts at a random position, so two traversals of the same
/// map generally disagree on order. A [`Cursor`] can be interleaved with
/// inserts; every entry present for the whole traversal is still observed
/// exactly once.
#[derive(Clone)]
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    table: BucketTable<K, V, S>,
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug + Hash + PartialEq,
    V: Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut rng = SmallRng::seed_from_u64(FIXED_ORDER_SEED);
        f.debug_map().entries(self.table.iter_with_rng(&mut rng)).finish()
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates a new hash map with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use evac_map::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates a new hash map that holds at least `capacity` entries before
    /// its first growth.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use evac_map::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_capacity_and_hasher(100, SimpleHasher);
    /// assert!(map.capacity() >= 100);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            table: BucketTable::with_capacity_and_hasher(capacity, hash_builder),
        }
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        self.table.hasher()
    }

    /// Returns the number of entries in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// assert_eq!(map.len(), 0);
    /// map.insert(1, "a");
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of entries the map holds before its next growth.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns `true` while a growth is still moving entries across.
    pub fn is_growing(&self) -> bool {
        self.table.is_growing()
    }

    /// Removes all entries, keeping the bucket count.
    ///
    /// Outstanding cursors are exhausted.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Removes all entries, returning them as an iterator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// map.insert(1, "a");
    /// map.insert(2, "b");
    ///
    /// let mut drained = map.drain().collect::<Vec<_>>();
    /// drained.sort();
    /// assert_eq!(drained, [(1, "a"), (2, "b")]);
    /// assert!(map.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<K, V> {
        self.table.drain()
    }

    /// Returns debug statistics about the underlying table.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        self.table.debug_stats()
    }

    /// Returns the underlying table.
    pub fn as_table(&self) -> &BucketTable<K, V, S> {
        &self.table
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    /// Inserts a key-value pair into the map.
    ///
    /// If the map already had this key, the value is replaced and the old
    /// value is returned.
    ///
    /// # Panics
    ///
    /// Panics if a bucket cannot be allocated. See
    /// [`try_insert`](Self::try_insert).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.try_insert(key, value)
            .unwrap_or_else(|error| allocation_failed(error))
    }

    /// Inserts a key-value pair into the map, reporting allocation failure
    /// instead of panicking.
    ///
    /// # Errors
    ///
    /// See [`BucketTable::try_insert`].
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.table.try_insert(key, value)
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let mut map: HashMap<i32, &str> = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.get(&1), Some(&"a"));
    /// assert_eq!(map.get(&2), None);
    /// ```
    pub fn get(&self, key: &K) -> Option<&V> {
        self.table.lookup(key)
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.table.lookup_mut(key)
    }

    /// Returns the stored key and its value.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        self.table.lookup_key_value(key)
    }

    /// Returns `true` if the map contains a value for the key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.table.lookup(key).is_some()
    }

    /// Rebuilds the map at the smallest size that holds its entries.
    ///
    /// Outstanding cursors are exhausted.
    ///
    /// # Panics
    ///
    /// Panics if the new buckets cannot be allocated.
    pub fn shrink_to_fit(&mut self) {
        self.table
            .shrink_to_fit()
            .unwrap_or_else(|error| allocation_failed(error));
    }

    /// Returns an iterator over the entries, starting at a position drawn
    /// from `rng`.
    pub fn iter_with_rng<R: RngCore + ?Sized>(&self, rng: &mut R) -> Iter<'_, K, V, S> {
        self.table.iter_with_rng(rng)
    }

    /// Returns an iterator over the entries, starting at a position drawn
    /// from the thread-local generator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let map: HashMap<i32, i32> = (0..10).map(|i| (i, i * i)).collect();
    /// let mut squares = map.iter().map(|(_, &v)| v).collect::<Vec<_>>();
    /// squares.sort();
    /// assert_eq!(squares, [0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
    /// ```
    #[cfg(feature = "std")]
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        self.table.iter_with_rng(&mut rand::rng())
    }

    /// Returns an iterator over the keys, in randomized order.
    #[cfg(feature = "std")]
    pub fn keys(&self) -> Keys<'_, K, V, S> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the values, in randomized order.
    #[cfg(feature = "std")]
    pub fn values(&self) -> Values<'_, K, V, S> {
        Values { inner: self.iter() }
    }

    /// Starts a detached traversal. Drive it with [`advance`](Self::advance);
    /// the map may be written between steps.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let mut map: HashMap<u32, u32> = (0..100).map(|i| (i, 0)).collect();
    /// let mut cursor = map.cursor(&mut rand::rng());
    /// while let Some((&k, _)) = map.advance(&mut cursor) {
    ///     map.insert(k, 1);
    /// }
    /// assert!(map.iter().all(|(_, &v)| v == 1));
    /// ```
    pub fn cursor<R: RngCore + ?Sized>(&self, rng: &mut R) -> Cursor {
        self.table.cursor(rng)
    }

    /// Steps `cursor` over this map.
    pub fn advance<'a>(&'a self, cursor: &mut Cursor) -> Option<(&'a K, &'a V)> {
        cursor.advance(&self.table)
    }

    /// Returns an entry picked uniformly at random, or `None` if the map is
    /// empty.
    pub fn random_entry<R: RngCore + ?Sized>(&self, rng: &mut R) -> Option<(&K, &V)> {
        self.table.random_entry(rng)
    }

    /// Returns the bytes of the stored key followed by the bytes of its value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let mut map: HashMap<&str, u16> = HashMap::new();
    /// map.insert("id", 0x0102);
    /// assert_eq!(map.entry_bytes(&"id"), Some(vec![b'i', b'd', 0x02, 0x01]));
    /// ```
    pub fn entry_bytes(&self, key: &K) -> Option<Vec<u8>>
    where
        K: AsBytes,
        V: AsBytes,
    {
        let (k, v) = self.table.lookup_key_value(key)?;
        let (k, v) = (k.byte_view(), v.byte_view());
        let mut bytes = Vec::with_capacity(k.len() + v.len());
        bytes.extend_from_slice(&k);
        bytes.extend_from_slice(&v);
        Some(bytes)
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    S: Default,
{
    /// Creates a new hash map using the default hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_map::HashMap;
    /// #
    /// let map: HashMap<i32, String> = HashMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates a new hash map with the specified capacity using the default
    /// hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> PartialEq for HashMap<K, V, S>
where
    K: Hash + PartialEq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut rng = SmallRng::seed_from_u64(FIXED_ORDER_SEED);
        self.table
            .iter_with_rng(&mut rng)
            .all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, S> Index<&K> for HashMap<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is not present in the map.
    fn index(&self, key: &K) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key not found"),
        }
    }
}

impl<K, V, S> Extend<(K, V)> for HashMap<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity(iter.size_hint().0);
        map.extend(iter);
        map
    }
}

impl<K, V, S> IntoIterator for HashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = Drain<K, V>;

    fn into_iter(mut self) -> Self::IntoIter {
        self.table.drain()
    }
}

#[cfg(feature = "std")]
impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the keys of a `HashMap`.
#[cfg(feature = "std")]
pub struct Keys<'a, K, V, S> {
    inner: Iter<'a, K, V, S>,
}

#[cfg(feature = "std")]
impl<'a, K, V, S> Iterator for Keys<'a, K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// An iterator over the values of a `HashMap`.
#[cfg(feature = "std")]
pub struct Values<'a, K, V, S> {
    inner: Iter<'a, K, V, S>,
}

#[cfg(feature = "std")]
impl<'a, K, V, S> Iterator for Values<'a, K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
