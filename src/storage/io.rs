//! Page I/O backend implementations.
//!
//! This module provides the `Storage` trait for page-based I/O operations,
//! along with MemoryStorage and FileStorage implementations.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use super::error::StorageError;
use super::page::PageId;

/// Page I/O backend trait for page-based storage.
///
/// This trait defines the interface for reading and writing 4KB pages using
/// caller-owned buffers. Implementations include:
/// - `io::MemoryStorage`: In-memory storage
/// - `io::FileStorage`: Disk-backed storage using tokio::fs
///
/// # Design Decisions
///
/// 1. **Async trait**: Uses `async fn` (Rust 1.75+) for compatibility with
///    tokio. File I/O is inherently blocking, so FileStorage uses tokio::fs.
///
/// 2. **Caller-owned buffers**: Storage reads and writes raw bytes only.
///    Memory management is the responsibility of the caller (the buffer
///    pool's disk scheduler).
///
/// 3. **Allocation lives above this layer**: page identifiers are produced by
///    the buffer pool's monotone allocator. A write beyond the current end of
///    the store extends it; a read of a page that was never written zero-fills
///    the buffer and succeeds. This is what makes "page created in memory,
///    evicted clean, fetched later" well-defined.
///
/// 4. **No caching**: caching is the responsibility of the buffer pool.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (Send + Sync). The buffer pool handles
/// page-level locking; this trait handles only raw I/O.
pub trait Storage: Send + Sync {
    /// Reads a page into a caller-provided buffer.
    ///
    /// A page that was never written reads back as all zeroes.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn read_page(
        &self,
        page_id: PageId,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Writes a page from a caller-provided buffer, extending the store if
    /// the page lies beyond its current end.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn write_page(
        &self,
        page_id: PageId,
        buf: &[u8],
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Returns the number of pages materialized in the store.
    fn page_count(&self) -> impl std::future::Future<Output = usize> + Send;

    /// Syncs all pending writes to physical disk (fsync).
    ///
    /// For io::MemoryStorage, this is a no-op.
    /// For io::FileStorage, this calls `sync_all()` to ensure durability.
    fn sync_all(&self) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;
}
