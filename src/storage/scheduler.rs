//! Asynchronous disk request scheduling.
//!
//! The disk scheduler decouples the buffer pool from the storage backend:
//! callers enqueue page I/O requests and block on per-request completion
//! signals only when they need the result. A single background worker drains
//! the queue in FIFO order, so two requests for the same page submitted in
//! order are applied in order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::StorageError;
use super::io::Storage;
use super::page::{PageData, PageId};

/// A single page I/O request.
///
/// The request owns its page buffer. On completion the buffer travels back
/// through `done`: for a read it comes back filled with the page contents,
/// for a write it comes back unchanged. Device errors are delivered through
/// the same channel.
pub struct DiskRequest {
    /// True for a write to disk, false for a read from disk.
    pub is_write: bool,
    /// The 4KB buffer the request operates on.
    pub data: PageData,
    /// The page the request targets.
    pub page_id: PageId,
    /// Completion signal, carrying the buffer back to the caller.
    pub done: oneshot::Sender<Result<PageData, StorageError>>,
}

/// FIFO disk scheduler with a single background worker.
///
/// Created with a shared handle to a storage backend; `new` spawns the worker
/// task, so it must be called from within a tokio runtime.
///
/// # Shutdown
///
/// `shutdown` enqueues a sentinel behind all previously scheduled requests
/// and waits for the worker to drain and exit; every request scheduled before
/// the shutdown call is completed first. Scheduling after shutdown is a
/// programming error and panics.
pub struct DiskScheduler {
    tx: mpsc::UnboundedSender<Option<DiskRequest>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskScheduler {
    /// Creates a scheduler and spawns its worker task.
    pub fn new<S: Storage + 'static>(storage: Arc<S>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(storage, rx));
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueues a request and returns immediately.
    ///
    /// The caller observes completion through the request's `done` channel.
    ///
    /// # Panics
    ///
    /// Panics if called after `shutdown`.
    pub fn schedule(&self, request: DiskRequest) {
        self.tx
            .send(Some(request))
            .unwrap_or_else(|_| panic!("schedule called on a stopped disk scheduler"));
    }

    /// Signals the worker to drain outstanding requests and exit, then waits
    /// for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(None);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Best effort: wake the worker so it does not linger on the runtime.
        // Graceful paths go through `shutdown`.
        let _ = self.tx.send(None);
    }
}

async fn run_worker<S: Storage>(
    storage: Arc<S>,
    mut rx: mpsc::UnboundedReceiver<Option<DiskRequest>>,
) {
    debug!("disk scheduler worker started");

    while let Some(Some(request)) = rx.recv().await {
        let DiskRequest {
            is_write,
            mut data,
            page_id,
            done,
        } = request;

        let result = if is_write {
            storage
                .write_page(page_id, data.as_slice())
                .await
                .map(|()| data)
        } else {
            match storage.read_page(page_id, data.as_mut_slice()).await {
                Ok(()) => Ok(data),
                Err(e) => Err(e),
            }
        };

        if let Err(e) = &result {
            // The error belongs to the caller; the worker keeps serving.
            warn!(page = page_id.page_num(), error = %e, "disk request failed");
        }

        // The caller may have gone away; completion is then dropped.
        let _ = done.send(result);
    }

    debug!("disk scheduler worker stopped");
}
