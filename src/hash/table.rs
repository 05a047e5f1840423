//! Disk-backed extendible hash table.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use super::bucket::BucketPage;
use super::codec::{Comparator, DefaultKeyHasher, FixedLen, KeyHasher, OrdComparator};
use super::directory::{DirectoryPage, DIRECTORY_MAX_DEPTH_LIMIT};
use super::error::HashTableError;
use super::header::{HeaderPage, HEADER_MAX_DEPTH_LIMIT};
use crate::storage::{BufferPool, PageId, Storage};

/// Construction parameters of the hash table.
#[derive(Debug, Clone)]
pub struct HashTableConfig {
    /// Fixed depth of the header page; `2^header_max_depth` directory slots.
    pub header_max_depth: u32,
    /// Ceiling on every directory's global depth.
    pub directory_max_depth: u32,
    /// Entry capacity of each bucket page.
    pub bucket_max_size: u32,
}

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            header_max_depth: 2,
            directory_max_depth: DIRECTORY_MAX_DEPTH_LIMIT,
            bucket_max_size: 64,
        }
    }
}

/// Snapshot of one directory page, for tests and debugging.
#[derive(Debug)]
pub struct DirectoryInfo {
    /// The directory's own page id.
    pub page_id: PageId,
    /// Current global depth.
    pub global_depth: u32,
    /// Local depths of the live slots.
    pub local_depths: Vec<u8>,
    /// Bucket page ids of the live slots.
    pub bucket_page_ids: Vec<PageId>,
}

/// A persistent hash map over fixed-width keys and values.
///
/// Pages are reached through the buffer pool and latched via page guards in
/// the order header → directory → bucket, releasing each as soon as it is no
/// longer needed. Lookups take read guards; mutations take write guards, and
/// the directory guard is held across splits and merges because they rewrite
/// slot arrays.
pub struct DiskHashTable<K, V, S, C = OrdComparator, H = DefaultKeyHasher>
where
    S: Storage,
{
    name: String,
    pool: Arc<BufferPool<S>>,
    cmp: C,
    hasher: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S, C, H> DiskHashTable<K, V, S, C, H>
where
    K: FixedLen + Clone,
    V: FixedLen + Clone,
    S: Storage + 'static,
    C: Comparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a table, allocating its header page.
    ///
    /// # Errors
    ///
    /// `HashTableError::InvalidConfig` when a depth exceeds its page-layout
    /// limit or the bucket entry array cannot fit a page;
    /// `HashTableError::Buffer` when the header page cannot be allocated.
    pub async fn new(
        name: impl Into<String>,
        pool: Arc<BufferPool<S>>,
        cmp: C,
        hasher: H,
        config: HashTableConfig,
    ) -> Result<Self, HashTableError> {
        if config.header_max_depth > HEADER_MAX_DEPTH_LIMIT {
            return Err(HashTableError::InvalidConfig(format!(
                "header_max_depth {} exceeds limit {}",
                config.header_max_depth, HEADER_MAX_DEPTH_LIMIT
            )));
        }
        if config.directory_max_depth > DIRECTORY_MAX_DEPTH_LIMIT {
            return Err(HashTableError::InvalidConfig(format!(
                "directory_max_depth {} exceeds limit {}",
                config.directory_max_depth, DIRECTORY_MAX_DEPTH_LIMIT
            )));
        }
        if config.bucket_max_size == 0
            || config.bucket_max_size > BucketPage::<K, V>::capacity_limit()
        {
            return Err(HashTableError::InvalidConfig(format!(
                "bucket_max_size {} outside 1..={}",
                config.bucket_max_size,
                BucketPage::<K, V>::capacity_limit()
            )));
        }

        let guard = pool.new_page().await?;
        let header_page_id = guard.page_id();
        let mut header_guard = guard.upgrade_write().await;
        HeaderPage::new(config.header_max_depth).write_to(&mut *header_guard);
        drop(header_guard);

        Ok(Self {
            name: name.into(),
            pool,
            cmp,
            hasher,
            header_page_id,
            directory_max_depth: config.directory_max_depth,
            bucket_max_size: config.bucket_max_size,
            _marker: PhantomData,
        })
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The header page id, fixed for the table's lifetime.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up the values stored under a key. Absent keys yield an empty
    /// vector.
    pub async fn get(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let hash = self.hasher.hash_key(key);

        let header_guard = self.pool.fetch_page_read(self.header_page_id).await?;
        let header = HeaderPage::read_from(&header_guard);
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);

        if !directory_page_id.is_valid() {
            return Ok(Vec::new());
        }

        let directory_guard = self.pool.fetch_page_read(directory_page_id).await?;
        let directory = DirectoryPage::read_from(&directory_guard);
        let bucket_page_id = directory.bucket_page_id(directory.hash_to_bucket_index(hash));
        drop(directory_guard);

        if !bucket_page_id.is_valid() {
            return Ok(Vec::new());
        }

        let bucket_guard = self.pool.fetch_page_read(bucket_page_id).await?;
        let bucket = BucketPage::<K, V>::read_from(&bucket_guard);
        Ok(bucket.lookup(key, &self.cmp).cloned().into_iter().collect())
    }

    /// Inserts a key/value pair.
    ///
    /// Returns `Ok(false)` when the key is already present, or when storing
    /// it would require growing a directory past `directory_max_depth`.
    pub async fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let hash = self.hasher.hash_key(key);

        // Header: write guard because the directory slot may need to be
        // populated; released as soon as the directory id is known.
        let mut header_guard = self.pool.fetch_page_write(self.header_page_id).await?;
        let mut header = HeaderPage::read_from(&header_guard);
        let directory_idx = header.hash_to_directory_index(hash);
        let mut directory_page_id = header.directory_page_id(directory_idx);
        if !directory_page_id.is_valid() {
            let guard = self.pool.new_page().await?;
            directory_page_id = guard.page_id();
            let mut directory_write = guard.upgrade_write().await;
            DirectoryPage::new(self.directory_max_depth).write_to(&mut *directory_write);
            drop(directory_write);

            header.set_directory_page_id(directory_idx, directory_page_id);
            header.write_to(&mut *header_guard);
            debug!(table = %self.name, directory = directory_page_id.page_num(), "created directory");
        }
        drop(header_guard);

        let mut directory_guard = self.pool.fetch_page_write(directory_page_id).await?;
        let mut directory = DirectoryPage::read_from(&directory_guard);
        let mut directory_dirty = false;

        // First key routed into this region creates its bucket.
        let bucket_idx = directory.hash_to_bucket_index(hash);
        if !directory.bucket_page_id(bucket_idx).is_valid() {
            let guard = self.pool.new_page().await?;
            let bucket_page_id = guard.page_id();
            let mut bucket_write = guard.upgrade_write().await;
            BucketPage::<K, V>::new(self.bucket_max_size).write_to(&mut *bucket_write);
            drop(bucket_write);

            directory.set_bucket_page_id(bucket_idx, bucket_page_id);
            directory.set_local_depth(bucket_idx, 0);
            directory_dirty = true;
        }

        // Split loop. The directory guard is held throughout, so a retry can
        // never observe a half-updated directory.
        let inserted = loop {
            let bucket_idx = directory.hash_to_bucket_index(hash);
            let bucket_page_id = directory.bucket_page_id(bucket_idx);
            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id).await?;
            let mut bucket = BucketPage::<K, V>::read_from(&bucket_guard);

            if bucket.lookup(key, &self.cmp).is_some() {
                break false;
            }

            if !bucket.is_full() {
                let ok = bucket.insert(key.clone(), value.clone(), &self.cmp);
                debug_assert!(ok, "non-full bucket rejected insert");
                bucket.write_to(&mut *bucket_guard);
                break true;
            }

            // Full bucket. A bucket at global depth needs the directory to
            // double first; refuse at the depth ceiling.
            if directory.local_depth(bucket_idx) == directory.global_depth() {
                if directory.global_depth() >= directory.max_depth() {
                    break false;
                }
                directory.incr_global_depth();
                directory_dirty = true;
                debug!(
                    table = %self.name,
                    global_depth = directory.global_depth(),
                    "directory grown"
                );
            }

            // The slot index may have gained a high bit after growth.
            let bucket_idx = directory.hash_to_bucket_index(hash);
            self.split_bucket(&mut directory, &mut bucket, bucket_idx)
                .await?;
            directory_dirty = true;

            bucket.write_to(&mut *bucket_guard);
            drop(bucket_guard);
            // Retry: the key now lands in exactly one of the two buckets.
        };

        if directory_dirty {
            directory.write_to(&mut *directory_guard);
        }

        Ok(inserted)
    }

    /// Removes a key. Returns `Ok(false)` when it is absent.
    ///
    /// Emptying a bucket merges it with its split image (cascading), and the
    /// directory halves while every local depth sits below the global depth.
    pub async fn remove(&self, key: &K) -> Result<bool, HashTableError> {
        let hash = self.hasher.hash_key(key);

        let header_guard = self.pool.fetch_page_write(self.header_page_id).await?;
        let header = HeaderPage::read_from(&header_guard);
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);

        if !directory_page_id.is_valid() {
            return Ok(false);
        }

        let mut directory_guard = self.pool.fetch_page_write(directory_page_id).await?;
        let mut directory = DirectoryPage::read_from(&directory_guard);

        let bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        if !bucket_page_id.is_valid() {
            return Ok(false);
        }

        // Scope the bucket guard: merging must be able to delete the page.
        {
            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id).await?;
            let mut bucket = BucketPage::<K, V>::read_from(&bucket_guard);
            if !bucket.remove(key, &self.cmp) {
                return Ok(false);
            }
            bucket.write_to(&mut *bucket_guard);
        }

        let mut directory_dirty = self.merge_buckets(&mut directory, bucket_idx).await?;

        while directory.can_shrink() {
            directory.decr_global_depth();
            directory_dirty = true;
            debug!(
                table = %self.name,
                global_depth = directory.global_depth(),
                "directory shrunk"
            );
        }

        if directory_dirty {
            directory.write_to(&mut *directory_guard);
        }

        Ok(true)
    }

    /// Splits the full bucket at `bucket_idx`: allocates its split image,
    /// partitions the entries by the newly significant hash bit, and rewrites
    /// every affected directory slot.
    async fn split_bucket(
        &self,
        directory: &mut DirectoryPage,
        bucket: &mut BucketPage<K, V>,
        bucket_idx: usize,
    ) -> Result<(), HashTableError> {
        let new_local_depth = directory.local_depth(bucket_idx) + 1;
        debug_assert!(new_local_depth <= directory.global_depth());

        let guard = self.pool.new_page().await?;
        let new_bucket_page_id = guard.page_id();
        let mut new_bucket_guard = guard.upgrade_write().await;

        // Entries whose hash disagrees with the old slot in the newly
        // significant bit move to the image.
        let split_bit = 1u32 << (new_local_depth - 1);
        let (moved, kept): (Vec<_>, Vec<_>) = bucket
            .take_entries()
            .into_iter()
            .partition(|(k, _)| {
                (self.hasher.hash_key(k) ^ bucket_idx as u32) & split_bit != 0
            });
        bucket.replace_entries(kept);

        let mut new_bucket = BucketPage::<K, V>::new(self.bucket_max_size);
        new_bucket.replace_entries(moved);
        new_bucket.write_to(&mut *new_bucket_guard);
        drop(new_bucket_guard);

        // Every slot agreeing with the image in its low new_local_depth bits
        // now points at the image; the rest of the old bucket's slots keep
        // their page but take the deeper local depth.
        let new_bucket_idx = bucket_idx ^ split_bit as usize;
        let depth_mask = (1usize << new_local_depth) - 1;
        for i in 0..directory.size() {
            if i & depth_mask == new_bucket_idx & depth_mask {
                directory.set_bucket_page_id(i, new_bucket_page_id);
                directory.set_local_depth(i, new_local_depth as u8);
            } else if i & depth_mask == bucket_idx & depth_mask {
                directory.set_local_depth(i, new_local_depth as u8);
            }
        }

        debug!(
            table = %self.name,
            bucket = directory.bucket_page_id(bucket_idx).page_num(),
            image = new_bucket_page_id.page_num(),
            local_depth = new_local_depth,
            "bucket split"
        );
        Ok(())
    }

    /// Merges the bucket at `bucket_idx` with its split image while either of
    /// the pair is empty and both record the same local depth. Returns
    /// whether the directory changed.
    async fn merge_buckets(
        &self,
        directory: &mut DirectoryPage,
        mut bucket_idx: usize,
    ) -> Result<bool, HashTableError> {
        let mut directory_dirty = false;

        loop {
            let local_depth = directory.local_depth(bucket_idx);
            if local_depth == 0 {
                break;
            }
            let image_idx = directory.split_image_index(bucket_idx);
            if directory.local_depth(image_idx) != local_depth {
                break;
            }

            let bucket_page_id = directory.bucket_page_id(bucket_idx);
            let image_page_id = directory.bucket_page_id(image_idx);
            if bucket_page_id == image_page_id
                || !bucket_page_id.is_valid()
                || !image_page_id.is_valid()
            {
                break;
            }

            let bucket_empty = self.bucket_is_empty(bucket_page_id).await?;
            let image_empty = self.bucket_is_empty(image_page_id).await?;
            let (dead_page_id, survivor_page_id) = if bucket_empty {
                (bucket_page_id, image_page_id)
            } else if image_empty {
                (image_page_id, bucket_page_id)
            } else {
                break;
            };

            let new_local_depth = (local_depth - 1) as u8;
            for i in 0..directory.size() {
                let page_id = directory.bucket_page_id(i);
                if page_id == dead_page_id || page_id == survivor_page_id {
                    directory.set_bucket_page_id(i, survivor_page_id);
                    directory.set_local_depth(i, new_local_depth);
                }
            }
            directory_dirty = true;

            if !self.pool.delete_page(dead_page_id) {
                // A concurrent reader still pins the empty bucket; the page
                // is orphaned rather than reused.
                debug!(
                    table = %self.name,
                    page = dead_page_id.page_num(),
                    "merged bucket still pinned, leaking page"
                );
            }
            debug!(
                table = %self.name,
                survivor = survivor_page_id.page_num(),
                local_depth = new_local_depth,
                "buckets merged"
            );

            // Continue the cascade from the merged slot.
            bucket_idx &= (1usize << new_local_depth) - 1;
        }

        Ok(directory_dirty)
    }

    async fn bucket_is_empty(&self, bucket_page_id: PageId) -> Result<bool, HashTableError> {
        let guard = self.pool.fetch_page_read(bucket_page_id).await?;
        Ok(BucketPage::<K, V>::read_from(&guard).is_empty())
    }

    /// Snapshots every existing directory, for tests and debugging.
    pub async fn directory_info(&self) -> Result<Vec<DirectoryInfo>, HashTableError> {
        let header_guard = self.pool.fetch_page_read(self.header_page_id).await?;
        let header = HeaderPage::read_from(&header_guard);
        let directory_page_ids: Vec<PageId> = (0..header.size())
            .map(|i| header.directory_page_id(i))
            .filter(|page_id| page_id.is_valid())
            .collect();
        drop(header_guard);

        let mut info = Vec::with_capacity(directory_page_ids.len());
        for page_id in directory_page_ids {
            let guard = self.pool.fetch_page_read(page_id).await?;
            let directory = DirectoryPage::read_from(&guard);
            let size = directory.size();
            info.push(DirectoryInfo {
                page_id,
                global_depth: directory.global_depth(),
                local_depths: (0..size).map(|i| directory.local_depth(i) as u8).collect(),
                bucket_page_ids: (0..size).map(|i| directory.bucket_page_id(i)).collect(),
            });
        }
        Ok(info)
    }

    /// Asserts the invariants of every directory. Intended for tests; panics
    /// on violation.
    pub async fn verify_integrity(&self) -> Result<(), HashTableError> {
        let header_guard = self.pool.fetch_page_read(self.header_page_id).await?;
        let header = HeaderPage::read_from(&header_guard);
        let directory_page_ids: Vec<PageId> = (0..header.size())
            .map(|i| header.directory_page_id(i))
            .filter(|page_id| page_id.is_valid())
            .collect();
        drop(header_guard);

        for page_id in directory_page_ids {
            let guard = self.pool.fetch_page_read(page_id).await?;
            DirectoryPage::read_from(&guard).verify_integrity();
        }
        Ok(())
    }
}
