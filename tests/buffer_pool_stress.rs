//! Buffer pool stress test with concurrent random access.
//!
//! Simulates realistic concurrent access with:
//! - Multiple workers performing random read/write operations
//! - A pool far smaller than the page set, so evictions are constant
//! - Additive write model for deterministic verification
//! - Seeded RNGs so failures reproduce

use std::sync::{Arc, Mutex};

use burrow::storage::{BufferPool, BufferPoolConfig, FileStorage, PageId, PAGE_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// Test context containing shared resources.
struct TestContext {
    pool: BufferPool<FileStorage>,
    page_ids: Vec<PageId>,
    write_log: Mutex<Vec<WriteRecord>>,
    config: TestConfig,
    _temp_dir: TempDir, // Keep temp directory alive
}

/// Configuration for the stress test.
#[derive(Debug, Clone)]
struct TestConfig {
    /// Number of frames in the buffer pool.
    pool_size: usize,
    /// Total number of pages.
    total_pages: usize,
    /// Number of concurrent worker tasks.
    num_workers: usize,
    /// Number of operations each worker performs.
    ops_per_worker: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            total_pages: 64,
            num_workers: 8,
            ops_per_worker: 150,
        }
    }
}

/// A record of a write operation for verification.
#[derive(Debug, Clone, Copy)]
struct WriteRecord {
    /// Which page was written.
    page_index: usize,
    /// Byte range within the page.
    offset: usize,
    length: usize,
    /// Value added to each byte in the range.
    add_value: u8,
}

/// A single worker performing random reads and additive writes.
async fn worker_task(ctx: Arc<TestContext>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..ctx.config.ops_per_worker {
        let page_index = rng.gen_range(0..ctx.config.total_pages);
        let page_id = ctx.page_ids[page_index];
        let is_write = rng.gen_bool(0.3);

        if is_write {
            let offset = rng.gen_range(0..PAGE_SIZE);
            let length = rng.gen_range(1..=(PAGE_SIZE - offset).min(256));
            let record = WriteRecord {
                page_index,
                offset,
                length,
                add_value: rng.r#gen(),
            };

            // The write latch makes the read-modify-write atomic, so the
            // final state is order-independent.
            let mut guard = ctx.pool.fetch_page_write(page_id).await.unwrap();
            for i in record.offset..record.offset + record.length {
                guard[i] = guard[i].wrapping_add(record.add_value);
            }
            drop(guard);

            ctx.write_log.lock().unwrap().push(record);
        } else {
            let guard = ctx.pool.fetch_page_read(page_id).await.unwrap();
            let _byte = guard[rng.gen_range(0..PAGE_SIZE)];
        }

        tokio::task::yield_now().await;
    }
}

/// Replays the write log against a zeroed model and compares every byte.
async fn verify_final_state(ctx: &TestContext) {
    ctx.pool.flush_all().await.expect("flush_all failed");

    let mut expected = vec![vec![0u8; PAGE_SIZE]; ctx.config.total_pages];
    {
        let log = ctx.write_log.lock().unwrap();
        for record in log.iter() {
            let page = &mut expected[record.page_index];
            for i in record.offset..record.offset + record.length {
                page[i] = page[i].wrapping_add(record.add_value);
            }
        }
    }

    for (page_index, &page_id) in ctx.page_ids.iter().enumerate() {
        let guard = ctx.pool.fetch_page_read(page_id).await.unwrap();
        assert_eq!(
            &guard[..],
            &expected[page_index][..],
            "page {} diverged from the write log",
            page_index
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buffer_pool_stress_concurrent_access() {
    let config = TestConfig::default();

    let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
    let storage = FileStorage::open(temp_dir.path().join("stress.db"))
        .await
        .expect("failed to open FileStorage");

    let pool = BufferPool::new(
        storage,
        BufferPoolConfig {
            pool_size: config.pool_size,
            replacer_k: 2,
        },
    );

    // Materialize all pages up front.
    let mut page_ids = Vec::with_capacity(config.total_pages);
    for _ in 0..config.total_pages {
        let guard = pool.new_page().await.unwrap();
        page_ids.push(guard.page_id());
    }

    let ctx = Arc::new(TestContext {
        pool,
        page_ids,
        write_log: Mutex::new(Vec::new()),
        config,
        _temp_dir: temp_dir,
    });

    let mut handles = Vec::new();
    for index in 0..ctx.config.num_workers {
        let ctx = Arc::clone(&ctx);
        let seed = index as u64 * 12345; // Deterministic seed per worker
        handles.push(tokio::spawn(async move { worker_task(ctx, seed).await }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .unwrap_or_else(|e| panic!("worker {} panicked: {:?}", i, e));
    }

    verify_final_state(&ctx).await;
}
