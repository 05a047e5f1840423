//! Buffer pool manager for caching pages in memory.
//!
//! The buffer pool sits between the disk scheduler and higher-level
//! components, caching pages in a fixed array of frames. It guarantees at
//! most one in-memory copy of any page and coordinates pinning, eviction and
//! write-back.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::error::BufferPoolError;
use super::frame::{Frame, FrameId, FrameMetadata};
use super::guard::{PageGuard, PageReadGuard, PageWriteGuard};
use super::replacer::{AccessType, LruKReplacer};
use crate::storage::io::Storage;
use crate::storage::page::{PageData, PageId};
use crate::storage::scheduler::{DiskRequest, DiskScheduler};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the buffer pool.
    ///
    /// This determines the maximum number of pages that can be cached in
    /// memory simultaneously. Common values:
    /// - 128 frames = 512KB (for testing)
    /// - 1024 frames = 4MB (small database)
    /// - 262144 frames = 1GB (production)
    pub pool_size: usize,

    /// The K in LRU-K: how many most-recent accesses the replacement policy
    /// considers per frame.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
        }
    }
}

/// The buffer pool manager.
///
/// # Architecture
///
/// ```text
/// +-------------------+
/// |  Hash Index, ...  |
/// +-------------------+
///          |
///          v
/// +-------------------+
/// |    BufferPool     |  <- page table, free list, LRU-K replacer
/// +-------------------+
///          |
///          v
/// +-------------------+
/// |   DiskScheduler   |
/// +-------------------+
/// ```
///
/// # Concurrency Model
///
/// One mutex guards all bookkeeping: the page table, the free list, the
/// replacer, and per-frame metadata (page id, pin count, dirty flag). It is
/// taken at entry to every public operation and never held across `.await`.
/// Each frame's page bytes sit behind their own reader/writer latch
/// (`tokio::sync::RwLock`), owned by page guards.
///
/// While an I/O is in flight the bookkeeping lock is released; the frame
/// being operated on is unreachable from the free list, the page table and
/// the replacer at that point, so no other task can repurpose it.
///
/// # Lock Order
///
/// The bookkeeping mutex may be taken while holding a frame latch (flush does
/// this to clear the dirty bit), but no path awaits a frame latch while
/// holding the mutex.
pub struct BufferPool<S: Storage> {
    /// The backing device, shared with the scheduler's worker.
    storage: Arc<S>,

    /// Request queue to the device.
    scheduler: DiskScheduler,

    /// Frame array; each frame's bytes have their own latch. The Vec itself
    /// is immutable after construction.
    frames: Vec<Frame>,

    /// All mutable bookkeeping.
    state: Mutex<PoolState>,

    config: BufferPoolConfig,
}

/// Bookkeeping protected by the pool mutex.
struct PoolState {
    /// Maps PageId -> FrameId for resident pages. Its domain is exactly the
    /// set of frames whose metadata holds a page id.
    page_table: HashMap<PageId, FrameId>,

    /// Per-frame metadata, indexed by FrameId.
    metadata: Vec<FrameMetadata>,

    /// Frames not holding any page; disjoint from the page table's range.
    free_list: Vec<FrameId>,

    /// Eviction policy over the frames.
    replacer: LruKReplacer,

    /// Monotone page id allocator. Freed identifiers are not reused.
    next_page_id: u32,
}

impl PoolState {
    /// Pins a resident frame and refreshes its standing with the replacer.
    fn pin_resident(&mut self, frame_id: FrameId, access_type: AccessType) {
        self.metadata[frame_id.as_usize()].pin_count += 1;
        self.replacer
            .record_access(frame_id, access_type)
            .expect("resident frame id within pool range");
        self.replacer.set_evictable(frame_id, false);
    }

    /// Registers a newly loaded page in a limbo frame and pins it.
    fn install_page(&mut self, frame_id: FrameId, page_id: PageId, access_type: AccessType) {
        self.page_table.insert(page_id, frame_id);
        let meta = &mut self.metadata[frame_id.as_usize()];
        meta.page_id = Some(page_id);
        meta.pin_count = 1;
        meta.is_dirty = false;
        self.replacer
            .record_access(frame_id, access_type)
            .expect("frame id within pool range");
        self.replacer.set_evictable(frame_id, false);
    }
}

impl<S: Storage + 'static> BufferPool<S> {
    /// Creates a new buffer pool over the given storage backend.
    ///
    /// Spawns the disk scheduler's worker, so this must be called from within
    /// a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `config.pool_size` is 0.
    pub fn new(storage: S, config: BufferPoolConfig) -> Self {
        assert!(config.pool_size > 0, "pool_size must be > 0");

        let storage = Arc::new(storage);
        let scheduler = DiskScheduler::new(Arc::clone(&storage));

        let frames: Vec<_> = (0..config.pool_size).map(|_| Frame::new()).collect();
        let metadata: Vec<_> = (0..config.pool_size).map(|_| FrameMetadata::new()).collect();
        let free_list: Vec<_> = (0..config.pool_size).map(FrameId::new).collect();

        let state = PoolState {
            page_table: HashMap::with_capacity(config.pool_size),
            metadata,
            free_list,
            replacer: LruKReplacer::new(config.pool_size, config.replacer_k),
            next_page_id: 0,
        };

        Self {
            storage,
            scheduler,
            frames,
            state: Mutex::new(state),
            config,
        }
    }

    /// Returns the number of frames in the buffer pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Allocates a fresh page id, places the zeroed page in a frame, and
    /// returns it pinned.
    ///
    /// # Errors
    ///
    /// `BufferPoolError::NoFreeFrames` if no frame is free and none is
    /// evictable.
    pub async fn new_page(&self) -> Result<PageGuard<'_, S>, BufferPoolError> {
        // Obtain the frame first so an exhausted pool cannot leak a page id.
        let frame_id = self.acquire_frame().await?;

        {
            let mut latch = self.frames[frame_id.as_usize()].data.write().await;
            latch.zero();
        }

        let mut state = self.state.lock();
        debug_assert!(state.next_page_id != u32::MAX, "page id space exhausted");
        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += 1;
        state.install_page(frame_id, page_id, AccessType::Unknown);

        Ok(PageGuard::new(self, frame_id, page_id))
    }

    /// Fetches a page, reading it from disk if not resident, and returns it
    /// pinned.
    ///
    /// # Errors
    ///
    /// - `BufferPoolError::InvalidPageId` for the invalid sentinel
    /// - `BufferPoolError::NoFreeFrames` if the pool is full of pinned pages
    /// - `BufferPoolError::Storage` if the read fails
    pub async fn fetch_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<PageGuard<'_, S>, BufferPoolError> {
        if !page_id.is_valid() {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        // Fast path: page is resident.
        {
            let mut state = self.state.lock();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                state.pin_resident(frame_id, access_type);
                return Ok(PageGuard::new(self, frame_id, page_id));
            }
        }

        // Slow path: bring the page in from disk.
        let frame_id = self.acquire_frame().await?;

        let data = match self.read_from_disk(page_id).await {
            Ok(data) => data,
            Err(e) => {
                // Return the limbo frame so it is not leaked.
                self.state.lock().free_list.push(frame_id);
                return Err(e);
            }
        };

        {
            let mut latch = self.frames[frame_id.as_usize()].data.write().await;
            latch.as_mut_slice().copy_from_slice(data.as_slice());
        }

        let mut state = self.state.lock();
        if let Some(&existing) = state.page_table.get(&page_id) {
            // Another task loaded this page while we were reading; use its
            // frame and return ours to the free list.
            state.free_list.push(frame_id);
            state.pin_resident(existing, access_type);
            return Ok(PageGuard::new(self, existing, page_id));
        }
        state.install_page(frame_id, page_id, access_type);

        Ok(PageGuard::new(self, frame_id, page_id))
    }

    /// Fetches a page and latches it for reading.
    pub async fn fetch_page_read(
        &self,
        page_id: PageId,
    ) -> Result<PageReadGuard<'_, S>, BufferPoolError> {
        let guard = self.fetch_page(page_id, AccessType::Unknown).await?;
        Ok(guard.upgrade_read().await)
    }

    /// Fetches a page and latches it for writing.
    pub async fn fetch_page_write(
        &self,
        page_id: PageId,
    ) -> Result<PageWriteGuard<'_, S>, BufferPoolError> {
        let guard = self.fetch_page(page_id, AccessType::Unknown).await?;
        Ok(guard.upgrade_write().await)
    }

    /// Explicitly unpins a page.
    ///
    /// In normal usage pages are unpinned when their guard drops; this is the
    /// escape hatch for code that manages pins by hand.
    ///
    /// Returns false if the page is not resident or its pin count is already
    /// zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let idx = frame_id.as_usize();
        if state.metadata[idx].pin_count == 0 {
            return false;
        }
        if is_dirty {
            state.metadata[idx].is_dirty = true;
        }
        state.metadata[idx].pin_count -= 1;
        if state.metadata[idx].pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a page back to disk if it is resident and dirty, clearing the
    /// dirty bit.
    ///
    /// Returns whether the page was resident. Flushing a clean resident page
    /// is a no-op.
    pub async fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        if !page_id.is_valid() {
            return Ok(false);
        }

        let frame_id = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                None => return Ok(false),
                Some(&frame_id) if !state.metadata[frame_id.as_usize()].is_dirty => {
                    return Ok(true);
                }
                Some(&frame_id) => frame_id,
            }
        };

        // Hold the shared latch across the write so no writer can slip a
        // modification between the write and the dirty-bit clear.
        let latch = self.frames[frame_id.as_usize()].data.read().await;

        {
            let state = self.state.lock();
            if state.metadata[frame_id.as_usize()].page_id != Some(page_id) {
                // Evicted while we waited for the latch; eviction already
                // wrote it back.
                return Ok(true);
            }
        }

        self.write_to_disk(page_id, latch.clone()).await?;

        let mut state = self.state.lock();
        if state.metadata[frame_id.as_usize()].page_id == Some(page_id) {
            state.metadata[frame_id.as_usize()].is_dirty = false;
        }
        drop(state);
        drop(latch);

        Ok(true)
    }

    /// Flushes every resident page, then syncs the device.
    pub async fn flush_all(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };

        for page_id in resident {
            self.flush_page(page_id).await?;
        }

        self.storage.sync_all().await?;
        Ok(())
    }

    /// Deletes a page from the buffer pool, returning its frame to the free
    /// list and retiring the identifier.
    ///
    /// Returns false if the page is pinned. Non-resident identifiers succeed
    /// trivially. In-memory modifications of the deleted page are discarded.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        if !page_id.is_valid() {
            return true;
        }

        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };

        if state.metadata[frame_id.as_usize()].pin_count > 0 {
            return false;
        }

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.metadata[frame_id.as_usize()].reset();
        state.free_list.push(frame_id);
        // The identifier is retired: the allocator never hands it out again.
        true
    }

    /// Flushes everything and stops the disk scheduler.
    ///
    /// All guards must have been dropped before calling this.
    pub async fn shutdown(&self) -> Result<(), BufferPoolError> {
        self.flush_all().await?;
        self.scheduler.shutdown().await;
        Ok(())
    }

    /// Obtains a frame for a new resident page: from the free list if
    /// possible, otherwise by evicting a victim (writing it back first if
    /// dirty).
    ///
    /// The returned frame is in limbo: absent from the free list, the page
    /// table and the replacer, so no other task can touch it until the caller
    /// installs a page.
    async fn acquire_frame(&self) -> Result<FrameId, BufferPoolError> {
        let (frame_id, completion) = {
            let mut state = self.state.lock();

            if let Some(frame_id) = state.free_list.pop() {
                (frame_id, None)
            } else {
                let Some(frame_id) = state.replacer.evict() else {
                    return Err(BufferPoolError::NoFreeFrames);
                };
                let idx = frame_id.as_usize();
                debug_assert_eq!(state.metadata[idx].pin_count, 0);

                // The write-back is enqueued and the page unmapped in one
                // critical section, so a concurrent re-fetch of the old page
                // misses the table and its read is served after the write.
                let mut completion = None;
                if let Some(old_page_id) = state.metadata[idx].page_id {
                    if state.metadata[idx].is_dirty {
                        debug!(
                            frame = idx,
                            page = old_page_id.page_num(),
                            "writing back evicted page"
                        );
                        // An evictable frame is unpinned, and guards release
                        // their latch before unpinning, so at most readers
                        // hold it here.
                        let latch = self.frames[idx]
                            .data
                            .try_read()
                            .expect("evictable frame is not write-latched");
                        let data = latch.clone();
                        drop(latch);

                        let (done, receiver) = oneshot::channel();
                        self.scheduler.schedule(DiskRequest {
                            is_write: true,
                            data,
                            page_id: old_page_id,
                            done,
                        });
                        completion = Some(receiver);
                    }
                    state.page_table.remove(&old_page_id);
                }
                state.metadata[idx].reset();
                (frame_id, completion)
            }
        };

        // Eviction write-back is synchronous: the frame is handed out only
        // once the old contents are on disk.
        if let Some(completion) = completion {
            let result = match completion.await {
                Ok(result) => result.map(|_| ()).map_err(BufferPoolError::from),
                Err(_) => Err(BufferPoolError::Internal("disk scheduler dropped a request")),
            };
            if let Err(e) = result {
                // The old page is already gone from the table; keep the frame
                // reusable and surface the device error.
                self.state.lock().free_list.push(frame_id);
                return Err(e);
            }
        }

        Ok(frame_id)
    }

    async fn read_from_disk(&self, page_id: PageId) -> Result<PageData, BufferPoolError> {
        let (done, completion) = oneshot::channel();
        self.scheduler.schedule(DiskRequest {
            is_write: false,
            data: PageData::new(),
            page_id,
            done,
        });
        match completion.await {
            Ok(result) => result.map_err(BufferPoolError::from),
            Err(_) => Err(BufferPoolError::Internal("disk scheduler dropped a request")),
        }
    }

    async fn write_to_disk(&self, page_id: PageId, data: PageData) -> Result<(), BufferPoolError> {
        let (done, completion) = oneshot::channel();
        self.scheduler.schedule(DiskRequest {
            is_write: true,
            data,
            page_id,
            done,
        });
        match completion.await {
            Ok(result) => result.map(|_| ()).map_err(BufferPoolError::from),
            Err(_) => Err(BufferPoolError::Internal("disk scheduler dropped a request")),
        }
    }
}

impl<S: Storage> BufferPool<S> {
    /// Frame accessor for guards.
    pub(super) fn frame(&self, frame_id: FrameId) -> &Frame {
        &self.frames[frame_id.as_usize()]
    }

    /// Unpins a frame (called from guard drops).
    ///
    /// Synchronous so it is callable from `Drop`.
    ///
    /// # Panics
    ///
    /// Panics if the frame's pin count is already zero; a guard unpinning
    /// twice is a bug.
    pub(super) fn unpin_frame(&self, frame_id: FrameId, is_dirty: bool) {
        let mut state = self.state.lock();
        let idx = frame_id.as_usize();

        assert!(
            state.metadata[idx].pin_count > 0,
            "unpin of frame {} with pin_count == 0",
            frame_id
        );

        if is_dirty {
            state.metadata[idx].is_dirty = true;
        }
        state.metadata[idx].pin_count -= 1;
        if state.metadata[idx].pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
    }

    #[cfg(test)]
    fn frame_snapshot(&self, page_id: PageId) -> Option<(FrameId, u32, bool)> {
        let state = self.state.lock();
        let &frame_id = state.page_table.get(&page_id)?;
        let meta = &state.metadata[frame_id.as_usize()];
        Some((frame_id, meta.pin_count, meta.is_dirty))
    }
}
