//! Bucket page of the extendible hash index.

use bytes::{Buf, BufMut};

use super::codec::{Comparator, FixedLen};
use crate::storage::PAGE_SIZE;

/// Bytes occupied by the size and max_size fields.
pub const BUCKET_HEADER_LEN: usize = 8;

/// A bucket page: a bounded, sorted array of key/value entries.
///
/// Entries are kept in comparator order so lookup is a binary search and the
/// split partition walk is a single pass.
///
/// Layout:
///
/// ```text
/// +----------+----------+----------------------------+---------+
/// |   size   | max_size | entries[max_size] of (K,V) | padding |
/// |  (u32)   |  (u32)   |    (fixed width each)      |         |
/// +----------+----------+----------------------------+---------+
/// ```
#[derive(Debug)]
pub struct BucketPage<K, V> {
    max_size: u32,
    entries: Vec<(K, V)>,
}

impl<K: FixedLen, V: FixedLen> BucketPage<K, V> {
    /// The largest `max_size` whose entry array fits in one page.
    pub fn capacity_limit() -> u32 {
        ((PAGE_SIZE - BUCKET_HEADER_LEN) / (K::ENCODED_LEN + V::ENCODED_LEN)) as u32
    }

    /// Creates an empty bucket.
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is zero or the entry array would not fit in a
    /// page.
    pub fn new(max_size: u32) -> Self {
        assert!(max_size > 0, "bucket max_size must be > 0");
        assert!(
            max_size <= Self::capacity_limit(),
            "bucket max_size {} exceeds page capacity {}",
            max_size,
            Self::capacity_limit()
        );
        Self {
            max_size,
            entries: Vec::with_capacity(max_size as usize),
        }
    }

    /// Decodes a bucket from page bytes.
    pub fn read_from(mut buf: &[u8]) -> Self {
        let size = buf.get_u32_le();
        let max_size = buf.get_u32_le();
        let entries = (0..size)
            .map(|_| {
                let key = K::decode(&mut buf);
                let value = V::decode(&mut buf);
                (key, value)
            })
            .collect();
        Self { max_size, entries }
    }

    /// Encodes the bucket into page bytes.
    pub fn write_to(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.entries.len() as u32);
        buf.put_u32_le(self.max_size);
        for (key, value) in &self.entries {
            key.encode(&mut buf);
            value.encode(&mut buf);
        }
    }

    /// Number of stored entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Capacity of this bucket.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// True when no further entry fits.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size as usize
    }

    /// True when the bucket holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary-searches for a key: `Ok(index)` when present, `Err(index)` with
    /// the sorted insertion point when absent.
    pub fn key_index<C: Comparator<K>>(&self, key: &K, cmp: &C) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(entry_key, _)| cmp.compare(entry_key, key))
    }

    /// Looks up the value stored under a key.
    pub fn lookup<C: Comparator<K>>(&self, key: &K, cmp: &C) -> Option<&V> {
        self.key_index(key, cmp)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    /// Inserts an entry at its sorted position.
    ///
    /// Fails when the bucket is full or the key is already present.
    pub fn insert<C: Comparator<K>>(&mut self, key: K, value: V, cmp: &C) -> bool {
        if self.is_full() {
            return false;
        }
        match self.key_index(&key, cmp) {
            Ok(_) => false,
            Err(idx) => {
                self.entries.insert(idx, (key, value));
                true
            }
        }
    }

    /// Removes the entry stored under a key, shifting later entries left.
    pub fn remove<C: Comparator<K>>(&mut self, key: &K, cmp: &C) -> bool {
        match self.key_index(key, cmp) {
            Ok(idx) => {
                self.entries.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Takes all entries out, leaving the bucket empty. Used by splits.
    pub fn take_entries(&mut self) -> Vec<(K, V)> {
        std::mem::take(&mut self.entries)
    }

    /// Replaces the entry array wholesale. The entries must already be in
    /// comparator order; used by splits.
    ///
    /// # Panics
    ///
    /// Panics if more entries are supplied than the bucket can hold.
    pub fn replace_entries(&mut self, entries: Vec<(K, V)>) {
        assert!(entries.len() <= self.max_size as usize);
        self.entries = entries;
    }
}
