//! Test utilities for trackstore integration tests.
//!
//! Provides:
//! - Temporary database fixtures
//! - Detection builders
//! - Polling helpers for asynchronous commits

#![allow(dead_code)]

use rusqlite::Connection;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use trackstore::model::Detection;
use trackstore::observability::tracing::init_test_tracing;
use trackstore::storage::{BatchConfig, DetectionStore, StoreConfig};

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    /// Open a store on the fixture database with the given batch settings.
    pub fn open(&self, max_batch_size: usize, flush_interval: Duration) -> DetectionStore {
        let config = StoreConfig::new(&self.db_path).with_batch(BatchConfig {
            max_batch_size,
            flush_interval,
        });
        DetectionStore::open(config).expect("failed to open store")
    }

    /// Open a separate connection for assertions.
    pub fn connection(&self) -> Connection {
        Connection::open(&self.db_path).expect("failed to open verification connection")
    }

    /// Count rows in `table`.
    pub fn count(&self, table: &str) -> i64 {
        self.connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .expect("count query failed")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A detection with a box derived from its frame.
pub fn detection(track_id: i64, frame_id: i64) -> Detection {
    let offset = frame_id as f64;
    Detection {
        track_id,
        frame_id,
        class_name: "car".to_string(),
        confidence: 0.5,
        xmin: offset,
        ymin: offset,
        xmax: offset + 20.0,
        ymax: offset + 10.0,
    }
}

/// Register frames `1..=count` with a fixed size.
pub fn record_frames(store: &DetectionStore, count: i64) {
    for frame_id in 1..=count {
        store
            .record_frame(frame_id, 1280, 720)
            .expect("failed to record frame");
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
