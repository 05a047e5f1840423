//! Directory page of the extendible hash index.

use std::collections::HashMap;

use bytes::{Buf, BufMut};

use crate::storage::PageId;

/// Upper bound on a directory's max depth so both arrays fit in one 4KB
/// page: 8 bytes of depths + 2^9 * 4 bytes of page ids + 2^9 local depths.
pub const DIRECTORY_MAX_DEPTH_LIMIT: u32 = 9;

/// A directory page mapping the low `global_depth` bits of a hash to bucket
/// pages.
///
/// The arrays are physically sized for `2^max_depth` slots; only the first
/// `2^global_depth` are live. Two slots agreeing in their low `local_depth`
/// bits share a bucket.
///
/// Layout:
///
/// ```text
/// +-----------+--------------+------------------------------+------------------------+---------+
/// | max_depth | global_depth | bucket_page_ids[2^max_depth] | local_depths[2^max_..] | padding |
/// |   (u32)   |    (u32)     |          (u32 each)          |       (u8 each)        |         |
/// +-----------+--------------+------------------------------+------------------------+---------+
/// ```
#[derive(Debug)]
pub struct DirectoryPage {
    max_depth: u32,
    global_depth: u32,
    bucket_page_ids: Vec<PageId>,
    local_depths: Vec<u8>,
}

impl DirectoryPage {
    /// Creates an empty directory at global depth 0.
    ///
    /// # Panics
    ///
    /// Panics if `max_depth` exceeds [`DIRECTORY_MAX_DEPTH_LIMIT`].
    pub fn new(max_depth: u32) -> Self {
        assert!(
            max_depth <= DIRECTORY_MAX_DEPTH_LIMIT,
            "directory max_depth {} exceeds limit {}",
            max_depth,
            DIRECTORY_MAX_DEPTH_LIMIT
        );
        Self {
            max_depth,
            global_depth: 0,
            bucket_page_ids: vec![PageId::INVALID; 1 << max_depth],
            local_depths: vec![0; 1 << max_depth],
        }
    }

    /// Decodes a directory from page bytes.
    pub fn read_from(mut buf: &[u8]) -> Self {
        let max_depth = buf.get_u32_le();
        let global_depth = buf.get_u32_le();
        let physical = 1usize << max_depth;
        let bucket_page_ids = (0..physical)
            .map(|_| PageId::new(buf.get_u32_le()))
            .collect();
        let local_depths = (0..physical).map(|_| buf.get_u8()).collect();
        Self {
            max_depth,
            global_depth,
            bucket_page_ids,
            local_depths,
        }
    }

    /// Encodes the directory into page bytes.
    pub fn write_to(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.max_depth);
        buf.put_u32_le(self.global_depth);
        for page_id in &self.bucket_page_ids {
            buf.put_u32_le(page_id.page_num());
        }
        for &depth in &self.local_depths {
            buf.put_u8(depth);
        }
    }

    /// The depth ceiling fixed at construction.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// The current global depth.
    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Number of live slots, `2^global_depth`.
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    /// Mask selecting the low `global_depth` bits of a hash.
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Selects the bucket slot for a hash from its low `global_depth` bits.
    pub fn hash_to_bucket_index(&self, hash: u32) -> usize {
        (hash & self.global_depth_mask()) as usize
    }

    /// The bucket page a slot points at, or the invalid id.
    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        debug_assert!(bucket_idx < self.size());
        self.bucket_page_ids[bucket_idx]
    }

    /// Points a slot at a bucket page.
    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, page_id: PageId) {
        debug_assert!(bucket_idx < self.size());
        self.bucket_page_ids[bucket_idx] = page_id;
    }

    /// The local depth recorded for a slot.
    pub fn local_depth(&self, bucket_idx: usize) -> u32 {
        debug_assert!(bucket_idx < self.size());
        self.local_depths[bucket_idx] as u32
    }

    /// Sets the local depth recorded for a slot.
    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u8) {
        debug_assert!(bucket_idx < self.size());
        self.local_depths[bucket_idx] = local_depth;
    }

    /// The index of a slot's split image: the slot differing in bit
    /// `local_depth - 1`.
    ///
    /// Only meaningful for slots with a non-zero local depth.
    pub fn split_image_index(&self, bucket_idx: usize) -> usize {
        debug_assert!(self.local_depth(bucket_idx) > 0);
        bucket_idx ^ (1 << (self.local_depth(bucket_idx) - 1))
    }

    /// Doubles the directory by replicating the lower half into the new
    /// upper half. Refuses to grow past `max_depth`.
    pub fn incr_global_depth(&mut self) {
        if self.global_depth >= self.max_depth {
            return;
        }
        let half = self.size();
        for i in 0..half {
            self.bucket_page_ids[half + i] = self.bucket_page_ids[i];
            self.local_depths[half + i] = self.local_depths[i];
        }
        self.global_depth += 1;
    }

    /// Halves the directory. Refuses to shrink below depth 0.
    pub fn decr_global_depth(&mut self) {
        if self.global_depth == 0 {
            return;
        }
        self.global_depth -= 1;
    }

    /// True when every live slot's local depth is strictly below the global
    /// depth, i.e. the upper half mirrors the lower half.
    pub fn can_shrink(&self) -> bool {
        self.global_depth > 0
            && self.local_depths[..self.size()]
                .iter()
                .all(|&depth| (depth as u32) < self.global_depth)
    }

    /// Asserts the directory invariants.
    ///
    /// - every local depth ≤ global depth ≤ max depth
    /// - a bucket with local depth `d` is referenced by exactly
    ///   `2^(global_depth - d)` slots
    /// - slots agreeing in their low `local_depth` bits agree on bucket and
    ///   local depth
    ///
    /// Intended for tests and debugging; panics on violation.
    pub fn verify_integrity(&self) {
        assert!(self.global_depth <= self.max_depth);

        let mut reference_counts: HashMap<PageId, usize> = HashMap::new();
        for i in 0..self.size() {
            let page_id = self.bucket_page_ids[i];
            if !page_id.is_valid() {
                continue;
            }
            *reference_counts.entry(page_id).or_default() += 1;

            let local_depth = self.local_depth(i);
            assert!(
                local_depth <= self.global_depth,
                "slot {}: local depth {} exceeds global depth {}",
                i,
                local_depth,
                self.global_depth
            );

            let canonical = i & ((1 << local_depth) - 1);
            assert_eq!(
                self.bucket_page_ids[canonical], page_id,
                "slots {} and {} share low {} bits but disagree on bucket",
                i, canonical, local_depth
            );
            assert_eq!(
                self.local_depths[canonical] as u32, local_depth,
                "slots {} and {} share low {} bits but disagree on local depth",
                i, canonical, local_depth
            );
        }

        for i in 0..self.size() {
            let page_id = self.bucket_page_ids[i];
            if !page_id.is_valid() {
                continue;
            }
            let expected = 1usize << (self.global_depth - self.local_depth(i));
            assert_eq!(
                reference_counts[&page_id], expected,
                "bucket {:?} with local depth {} referenced {} times, expected {}",
                page_id,
                self.local_depth(i),
                reference_counts[&page_id],
                expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PAGE_SIZE;

    #[test]
    fn test_new_directory() {
        let directory = DirectoryPage::new(3);
        assert_eq!(directory.global_depth(), 0);
        assert_eq!(directory.size(), 1);
        assert!(!directory.bucket_page_id(0).is_valid());
        directory.verify_integrity();
    }

    #[test]
    fn test_grow_replicates_lower_half() {
        let mut directory = DirectoryPage::new(3);
        directory.set_bucket_page_id(0, PageId::new(5));
        directory.set_local_depth(0, 0);

        directory.incr_global_depth();
        assert_eq!(directory.global_depth(), 1);
        assert_eq!(directory.bucket_page_id(1), PageId::new(5));
        assert_eq!(directory.local_depth(1), 0);
        directory.verify_integrity();
    }

    #[test]
    fn test_grow_stops_at_max_depth() {
        let mut directory = DirectoryPage::new(1);
        directory.incr_global_depth();
        assert_eq!(directory.global_depth(), 1);
        directory.incr_global_depth();
        assert_eq!(directory.global_depth(), 1);
    }

    #[test]
    fn test_shrink_stops_at_zero() {
        let mut directory = DirectoryPage::new(2);
        directory.decr_global_depth();
        assert_eq!(directory.global_depth(), 0);
    }

    #[test]
    fn test_can_shrink() {
        let mut directory = DirectoryPage::new(2);
        assert!(!directory.can_shrink());

        directory.set_bucket_page_id(0, PageId::new(5));
        directory.incr_global_depth();
        // Both slots at local depth 0 < global depth 1.
        assert!(directory.can_shrink());

        directory.set_local_depth(0, 1);
        directory.set_bucket_page_id(1, PageId::new(6));
        directory.set_local_depth(1, 1);
        assert!(!directory.can_shrink());
    }

    #[test]
    fn test_split_image_index() {
        let mut directory = DirectoryPage::new(3);
        directory.incr_global_depth();
        directory.incr_global_depth();
        directory.set_local_depth(1, 2);
        assert_eq!(directory.split_image_index(1), 3);

        directory.set_local_depth(2, 1);
        assert_eq!(directory.split_image_index(2), 3);
    }

    #[test]
    fn test_hash_to_bucket_index_uses_low_bits() {
        let mut directory = DirectoryPage::new(3);
        assert_eq!(directory.hash_to_bucket_index(0xFFFF_FFFF), 0);

        directory.incr_global_depth();
        directory.incr_global_depth();
        assert_eq!(directory.hash_to_bucket_index(0b1101), 0b01);
        assert_eq!(directory.hash_to_bucket_index(0b1110), 0b10);
    }

    #[test]
    fn test_round_trip() {
        let mut directory = DirectoryPage::new(2);
        directory.set_bucket_page_id(0, PageId::new(8));
        directory.incr_global_depth();
        directory.set_bucket_page_id(1, PageId::new(9));
        directory.set_local_depth(0, 1);
        directory.set_local_depth(1, 1);

        let mut buf = vec![0u8; PAGE_SIZE];
        directory.write_to(&mut buf);

        let decoded = DirectoryPage::read_from(&buf);
        assert_eq!(decoded.max_depth(), 2);
        assert_eq!(decoded.global_depth(), 1);
        assert_eq!(decoded.bucket_page_id(0), PageId::new(8));
        assert_eq!(decoded.bucket_page_id(1), PageId::new(9));
        assert_eq!(decoded.local_depth(0), 1);
        assert_eq!(decoded.local_depth(1), 1);
        decoded.verify_integrity();
    }

    #[test]
    fn test_max_depth_fits_page() {
        let directory = DirectoryPage::new(DIRECTORY_MAX_DEPTH_LIMIT);
        let physical = 1usize << DIRECTORY_MAX_DEPTH_LIMIT;
        assert!(8 + physical * 4 + physical <= PAGE_SIZE);
        assert_eq!(directory.size(), 1);
    }
}
