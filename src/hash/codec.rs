//! Key/value codecs, comparison and hashing for the hash index.
//!
//! Bucket pages store entries at fixed offsets, so every key and value type
//! carries a fixed-width little-endian encoding through [`FixedLen`].
//! Ordering inside a bucket comes from a pluggable [`Comparator`]; the hash
//! that routes a key through header and directory comes from a pluggable
//! [`KeyHasher`].

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut};

use crate::storage::PageId;

/// Fixed-width byte codec for keys and values stored in bucket pages.
pub trait FixedLen: Sized {
    /// Encoded width in bytes.
    const ENCODED_LEN: usize;

    /// Appends the encoding to the buffer.
    fn encode(&self, buf: &mut impl BufMut);

    /// Reads one value, advancing the buffer.
    fn decode(buf: &mut impl Buf) -> Self;
}

impl FixedLen for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(*self);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        buf.get_i32_le()
    }
}

impl FixedLen for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(*self);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        buf.get_u32_le()
    }
}

impl FixedLen for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(*self);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        buf.get_i64_le()
    }
}

impl FixedLen for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(*self);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        buf.get_u64_le()
    }
}

/// Location of a record: page plus slot within the page.
///
/// The canonical value type for secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page containing the record.
    pub page_id: PageId,
    /// Slot within the page.
    pub slot: u32,
}

impl RecordId {
    /// Creates a new record identifier.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl FixedLen for RecordId {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.page_id.page_num());
        buf.put_u32_le(self.slot);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let page_id = PageId::new(buf.get_u32_le());
        let slot = buf.get_u32_le();
        Self { page_id, slot }
    }
}

/// Three-way key comparison used for bucket ordering and lookup.
pub trait Comparator<K>: Send + Sync {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Comparator delegating to the key's `Ord` instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord> Comparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Produces the 32-bit hash that routes a key through the index.
pub trait KeyHasher<K>: Send + Sync {
    /// Hashes a key.
    fn hash_key(&self, key: &K) -> u32;
}

/// Default hasher built on the standard library's hashing machinery,
/// truncated to 32 bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyHasher;

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}
