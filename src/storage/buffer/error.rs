//! Buffer pool errors.

use crate::storage::error::StorageError;
use crate::storage::page::PageId;

/// Errors that can occur during buffer pool operations.
#[derive(Debug)]
pub enum BufferPoolError {
    /// No free frames available and all pages are pinned.
    ///
    /// This occurs when the buffer pool is full and no frame can be evicted
    /// because every resident page is currently in use (pin_count > 0).
    NoFreeFrames,

    /// The invalid page id sentinel was passed to an operation that needs a
    /// real page.
    InvalidPageId(PageId),

    /// Underlying storage I/O error.
    Storage(StorageError),

    /// Internal invariant violation (should not happen in correct usage).
    Internal(&'static str),
}

impl std::fmt::Display for BufferPoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferPoolError::NoFreeFrames => {
                write!(f, "no free frames available and all pages are pinned")
            }
            BufferPoolError::InvalidPageId(page_id) => {
                write!(f, "invalid page id: {:?}", page_id)
            }
            BufferPoolError::Storage(e) => {
                write!(f, "storage error: {}", e)
            }
            BufferPoolError::Internal(msg) => {
                write!(f, "internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for BufferPoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferPoolError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for BufferPoolError {
    fn from(e: StorageError) -> Self {
        BufferPoolError::Storage(e)
    }
}
