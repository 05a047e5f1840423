//! Buffer pool for page caching.
//!
//! The buffer pool caches pages from the storage backend in a fixed set of
//! frames, with LRU-K replacement and RAII-based access guards.
//!
//! # Example
//!
//! ```no_run
//! use burrow::storage::{BufferPool, BufferPoolConfig, MemoryStorage};
//!
//! # async fn example() {
//! let storage = MemoryStorage::new();
//! let pool = BufferPool::new(storage, BufferPoolConfig::default());
//!
//! // Allocate and write a new page
//! let guard = pool.new_page().await.unwrap();
//! let page_id = guard.page_id();
//! let mut guard = guard.upgrade_write().await;
//! guard[0..5].copy_from_slice(b"hello");
//! drop(guard); // Unpins and marks dirty
//!
//! // Read the page back
//! let guard = pool.fetch_page_read(page_id).await.unwrap();
//! assert_eq!(&guard[0..5], b"hello");
//! # }
//! ```

mod error;
mod frame;
mod guard;
mod pool;
mod replacer;

pub use error::BufferPoolError;
pub use frame::FrameId;
pub use guard::{PageGuard, PageReadGuard, PageWriteGuard};
pub use pool::{BufferPool, BufferPoolConfig};
pub use replacer::{AccessType, LruKReplacer, ReplacerError};
