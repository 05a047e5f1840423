//! In-memory page storage implementation.

use parking_lot::Mutex;

use super::Storage;
use crate::storage::error::StorageError;
use crate::storage::page::{PageData, PageId, PAGE_SIZE};

/// In-memory page storage for testing and development.
///
/// Stores pages in a Vec backed by aligned memory allocations. Writes beyond
/// the current end extend the Vec with zeroed pages; reads beyond the end
/// zero-fill the caller's buffer.
pub struct MemoryStorage {
    pages: Mutex<Vec<PageData>>,
}

impl MemoryStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(Vec::new()),
        }
    }
}

impl Storage for MemoryStorage {
    async fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), StorageError> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let pages = self.pages.lock();
        match pages.get(page_id.page_num() as usize) {
            Some(page) => buf.copy_from_slice(page.as_slice()),
            // Never written: reads back as zeroes.
            None => buf.fill(0),
        }
        Ok(())
    }

    async fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), StorageError> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let mut pages = self.pages.lock();
        let idx = page_id.page_num() as usize;
        while pages.len() <= idx {
            pages.push(PageData::new());
        }
        pages[idx].as_mut_slice().copy_from_slice(buf);
        Ok(())
    }

    async fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    async fn sync_all(&self) -> Result<(), StorageError> {
        // No-op for in-memory storage
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}
