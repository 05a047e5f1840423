//! RAII guards for buffer pool page access.
//!
//! Guards own a pin on their page and release it exactly once on drop.
//! The basic `PageGuard` holds only the pin; upgrading acquires the frame's
//! reader/writer latch and yields a `PageReadGuard` or `PageWriteGuard` with
//! access to the page bytes. Guards are move-only values: moving one
//! transfers the pin, dropping one releases latch (if held) then pin.

use std::ops::{Deref, DerefMut};

use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};

use super::frame::FrameId;
use super::pool::BufferPool;
use crate::storage::io::Storage;
use crate::storage::page::{PageData, PageId};

/// Pin-only page guard.
///
/// Keeps the page resident without latching it; the page bytes are not
/// accessible until the guard is upgraded. Dropping unpins with the recorded
/// dirty bit.
pub struct PageGuard<'a, S: Storage> {
    pool: &'a BufferPool<S>,
    frame_id: FrameId,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a, S: Storage> PageGuard<'a, S> {
    pub(super) fn new(pool: &'a BufferPool<S>, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            is_dirty: false,
        }
    }

    /// Returns the PageId of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Records that the caller modified (or will modify) the page, so the
    /// eventual unpin marks the frame dirty.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Acquires the shared latch and converts into a read guard.
    ///
    /// The pin is transferred; the page stays pinned throughout.
    pub async fn upgrade_read(self) -> PageReadGuard<'a, S> {
        let (pool, frame_id, page_id, is_dirty) =
            (self.pool, self.frame_id, self.page_id, self.is_dirty);
        std::mem::forget(self);

        let latch = pool.frame(frame_id).data.read().await;
        PageReadGuard {
            pool,
            frame_id,
            page_id,
            is_dirty,
            latch: Some(latch),
        }
    }

    /// Acquires the exclusive latch and converts into a write guard.
    ///
    /// The pin is transferred; the page stays pinned throughout.
    pub async fn upgrade_write(self) -> PageWriteGuard<'a, S> {
        let (pool, frame_id, page_id) = (self.pool, self.frame_id, self.page_id);
        std::mem::forget(self);

        let latch = pool.frame(frame_id).data.write().await;
        PageWriteGuard {
            pool,
            frame_id,
            page_id,
            latch: Some(latch),
        }
    }
}

impl<S: Storage> Drop for PageGuard<'_, S> {
    fn drop(&mut self) {
        self.pool.unpin_frame(self.frame_id, self.is_dirty);
    }
}

/// RAII guard for read-only page access.
///
/// Holds the shared latch and a pin. Dropping releases the latch, then
/// unpins.
pub struct PageReadGuard<'a, S: Storage> {
    pool: &'a BufferPool<S>,
    frame_id: FrameId,
    page_id: PageId,
    is_dirty: bool,
    latch: Option<RwLockReadGuard<'a, PageData>>,
}

impl<S: Storage> PageReadGuard<'_, S> {
    /// Returns the PageId of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl<S: Storage> Deref for PageReadGuard<'_, S> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.latch.as_ref().expect("latch held until drop").as_slice()
    }
}

impl<S: Storage> Drop for PageReadGuard<'_, S> {
    fn drop(&mut self) {
        // Latch first, then pin.
        self.latch.take();
        self.pool.unpin_frame(self.frame_id, self.is_dirty);
    }
}

/// RAII guard for mutable page access.
///
/// Holds the exclusive latch and a pin. Dropping releases the latch, then
/// unpins and marks the page dirty unconditionally.
pub struct PageWriteGuard<'a, S: Storage> {
    pool: &'a BufferPool<S>,
    frame_id: FrameId,
    page_id: PageId,
    latch: Option<RwLockWriteGuard<'a, PageData>>,
}

impl<S: Storage> PageWriteGuard<'_, S> {
    /// Returns the PageId of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl<S: Storage> Deref for PageWriteGuard<'_, S> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.latch.as_ref().expect("latch held until drop").as_slice()
    }
}

impl<S: Storage> DerefMut for PageWriteGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.latch
            .as_mut()
            .expect("latch held until drop")
            .as_mut_slice()
    }
}

impl<S: Storage> Drop for PageWriteGuard<'_, S> {
    fn drop(&mut self) {
        // Latch first, then pin; a write guard always dirties its page.
        self.latch.take();
        self.pool.unpin_frame(self.frame_id, true);
    }
}
