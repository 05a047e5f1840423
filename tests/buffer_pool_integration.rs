//! Integration tests for the buffer pool.
//!
//! These tests verify pool behavior against both MemoryStorage and
//! FileStorage backends, including eviction, write-back, idempotence and
//! concurrent access patterns.

use std::sync::Arc;

use burrow::storage::{
    BufferPool, BufferPoolConfig, BufferPoolError, FileStorage, MemoryStorage, PageId, Storage,
    PAGE_SIZE,
};
use tempfile::tempdir;

fn config(pool_size: usize) -> BufferPoolConfig {
    BufferPoolConfig {
        pool_size,
        replacer_k: 2,
    }
}

/// Write through a write guard, flush, evict, re-fetch: the contents match
/// byte for byte.
async fn test_round_trip_through_eviction<S: Storage + 'static>(storage: S) {
    let pool = BufferPool::new(storage, config(2));

    let pattern: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();

    let guard = pool.new_page().await.unwrap();
    let page_id = guard.page_id();
    let mut write = guard.upgrade_write().await;
    write.copy_from_slice(&pattern);
    drop(write);

    pool.flush_page(page_id).await.unwrap();

    // Evict the page by cycling other pages through both frames.
    for _ in 0..3 {
        let filler = pool.new_page().await.unwrap();
        drop(filler);
    }

    let read = pool.fetch_page_read(page_id).await.unwrap();
    assert_eq!(&read[..], &pattern[..]);
}

#[tokio::test]
async fn test_round_trip_memory() {
    test_round_trip_through_eviction(MemoryStorage::new()).await;
}

#[tokio::test]
async fn test_round_trip_file() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path().join("test.db")).await.unwrap();
    test_round_trip_through_eviction(storage).await;
}

/// Eviction under pressure: with three frames and only one unpinned page,
/// allocating a fourth page evicts exactly that one, and its dirty contents
/// survive the trip through disk.
async fn test_eviction_under_pressure<S: Storage + 'static>(storage: S) {
    let pool = BufferPool::new(storage, config(3));

    let g1 = pool.new_page().await.unwrap();
    let p1 = g1.page_id();
    let mut w1 = g1.upgrade_write().await;
    w1[0..4].copy_from_slice(b"p1!!");
    drop(w1); // unpinned and dirty

    let _g2 = pool.new_page().await.unwrap();
    let _g3 = pool.new_page().await.unwrap();

    // Must succeed by evicting p1 (the only unpinned page).
    let g4 = pool.new_page().await.unwrap();
    assert_eq!(pool.page_count(), 3);
    drop(g4);

    let read = pool.fetch_page_read(p1).await.unwrap();
    assert_eq!(&read[0..4], b"p1!!");
}

#[tokio::test]
async fn test_eviction_under_pressure_memory() {
    test_eviction_under_pressure(MemoryStorage::new()).await;
}

#[tokio::test]
async fn test_eviction_under_pressure_file() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path().join("test.db")).await.unwrap();
    test_eviction_under_pressure(storage).await;
}

/// No victim: every frame pinned means allocation fails.
#[tokio::test]
async fn test_no_victim_failure() {
    let pool = BufferPool::new(MemoryStorage::new(), config(3));

    let _g1 = pool.new_page().await.unwrap();
    let _g2 = pool.new_page().await.unwrap();
    let _g3 = pool.new_page().await.unwrap();

    assert!(matches!(
        pool.new_page().await,
        Err(BufferPoolError::NoFreeFrames)
    ));
    assert!(matches!(
        pool.fetch_page_read(PageId::new(0)).await.map(|_| ()),
        Ok(())
    ));
}

/// Idempotence: double flush of a clean page is a no-op; delete of a
/// non-resident identifier succeeds without side effects.
#[tokio::test]
async fn test_idempotent_operations() {
    let pool = BufferPool::new(MemoryStorage::new(), config(4));

    let guard = pool.new_page().await.unwrap();
    let page_id = guard.page_id();
    let mut write = guard.upgrade_write().await;
    write[0] = 1;
    drop(write);

    assert!(pool.flush_page(page_id).await.unwrap());
    assert!(pool.flush_page(page_id).await.unwrap());
    assert!(pool.flush_page(page_id).await.unwrap());

    assert!(pool.delete_page(PageId::new(555)));
    assert!(pool.delete_page(PageId::new(555)));
    assert_eq!(pool.page_count(), 1);
}

/// flush_all persists every resident page; reopening the file sees the data.
#[tokio::test]
async fn test_flush_all_persists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flush_all.db");

    let mut page_ids = Vec::new();
    {
        let storage = FileStorage::open(&path).await.unwrap();
        let pool = BufferPool::new(storage, config(8));

        for i in 0..5u8 {
            let guard = pool.new_page().await.unwrap();
            page_ids.push(guard.page_id());
            let mut write = guard.upgrade_write().await;
            write[0] = i;
            write[1] = i.wrapping_mul(3);
        }
        pool.shutdown().await.unwrap();
    }

    {
        let storage = FileStorage::open(&path).await.unwrap();
        let pool = BufferPool::new(storage, config(8));
        for (i, &page_id) in page_ids.iter().enumerate() {
            let read = pool.fetch_page_read(page_id).await.unwrap();
            assert_eq!(read[0], i as u8, "page {} byte 0 mismatch", i);
            assert_eq!(read[1], (i as u8).wrapping_mul(3), "page {} byte 1", i);
        }
    }
}

/// Many readers share one page concurrently.
#[tokio::test]
async fn test_concurrent_readers_same_page() {
    let pool = Arc::new(BufferPool::new(MemoryStorage::new(), config(8)));

    let guard = pool.new_page().await.unwrap();
    let page_id = guard.page_id();
    let mut write = guard.upgrade_write().await;
    write[0] = 42;
    drop(write);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                let read = pool.fetch_page_read(page_id).await.unwrap();
                assert_eq!(read[0], 42);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

/// Writers on distinct pages proceed independently while the page set is
/// larger than the pool, so pages constantly cycle through eviction. The
/// worker count stays below the frame count, keeping a victim available for
/// every fetch.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_access_with_eviction() {
    const WORKERS: usize = 6;
    const PAGES_PER_WORKER: usize = 2;

    let pool = Arc::new(BufferPool::new(MemoryStorage::new(), config(8)));

    let mut page_ids = Vec::new();
    for i in 0..(WORKERS * PAGES_PER_WORKER) as u8 {
        let guard = pool.new_page().await.unwrap();
        page_ids.push(guard.page_id());
        let mut write = guard.upgrade_write().await;
        write[0] = i;
    }

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let pool = Arc::clone(&pool);
        // Each worker owns two pages and alternates between them.
        let own: Vec<PageId> = (0..PAGES_PER_WORKER)
            .map(|j| page_ids[worker * PAGES_PER_WORKER + j])
            .collect();
        handles.push(tokio::spawn(async move {
            for round in 0..60u32 {
                let page_id = own[round as usize % PAGES_PER_WORKER];
                let marker = (worker * PAGES_PER_WORKER + round as usize % PAGES_PER_WORKER) as u8;

                let read = pool.fetch_page_read(page_id).await.unwrap();
                assert_eq!(read[0], marker);
                drop(read);

                if round % 5 == 0 {
                    let mut write = pool.fetch_page_write(page_id).await.unwrap();
                    let value = write[1].wrapping_add(1);
                    write[1] = value;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Writes land on rounds 0,5,...,55; those alternate between the two
    // owned pages, six increments each.
    for &page_id in &page_ids {
        let read = pool.fetch_page_read(page_id).await.unwrap();
        assert_eq!(read[1], 6);
    }
}
