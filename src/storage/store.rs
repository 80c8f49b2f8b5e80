//! `DetectionStore`: the public write surface.
//!
//! Owns the write connection, the run, the write queue and the writer
//! thread. Frames are registered synchronously; detections are queued and
//! committed in batches by the writer.
//!
//! # Ordering
//!
//! Queued detections are committed in the order they were queued. There is
//! no ordering between a queued detection and a [`DetectionStore::record_frame`]
//! call made concurrently on another thread: register a frame before queueing
//! detections that reference it, or the batch containing them is rejected by
//! the frame foreign key.
//!
//! # Shutdown
//!
//! [`DetectionStore::close`] waits, without a timeout, until every queued
//! detection has been flushed. Queueing after `close` has started fails with
//! [`StoreError::Closed`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

use super::batch::BatchConfig;
use super::connection::SharedConnection;
use super::schema::{
    begin_run, initialize_schema, load_schema, needs_schema, record_frame, verify_schema,
    SchemaError,
};
use super::writer::{StatsRecorder, Writer, WriterError, WriterHandle, WriterStats};
use crate::model::Detection;

/// Default database location.
pub const DEFAULT_DB_PATH: &str = "data/detections.sqlite3";

/// Default time a register call waits for the write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not start. Fatal.
    #[error("Failed to initialize store: {message}")]
    Initialization { message: String },

    /// A synchronous frame registration failed; the caller decides what to do.
    #[error("Failed to register frame {frame_id}: {source}")]
    Registration {
        frame_id: i64,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Store is closed")]
    Closed,

    #[error("Writer thread panicked")]
    WorkerPanicked,
}

impl StoreError {
    fn init(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Initialization {
            message: format!("{context}: {err}"),
        }
    }
}

impl From<SchemaError> for StoreError {
    fn from(err: SchemaError) -> Self {
        Self::Initialization {
            message: err.to_string(),
        }
    }
}

/// Settings for [`DetectionStore::open`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// SQLite database file; created with its parent directory if missing.
    pub db_path: PathBuf,
    /// Batch size and flush interval of the writer.
    pub batch: BatchConfig,
    /// Schema DDL to use instead of the embedded one.
    pub schema_path: Option<PathBuf>,
    /// How long a transaction waits for the database write lock.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Default settings for the database at `db_path`.
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Replace the batch settings.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Use the DDL in `path` instead of the embedded schema.
    #[must_use]
    pub fn with_schema_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.schema_path = Some(path.into());
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            batch: BatchConfig::default(),
            schema_path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Asynchronous batched detection store for one run.
///
/// Share it between producer threads with `Arc`; every method takes `&self`.
pub struct DetectionStore {
    db_path: PathBuf,
    run_id: i64,
    conn: SharedConnection,
    stats: Arc<StatsRecorder>,
    /// `None` once shutdown has begun. Producers hold the read lock while
    /// sending, `close` takes the write lock to send the shutdown marker.
    handle: RwLock<Option<WriterHandle>>,
    writer: Mutex<Option<Writer>>,
}

impl DetectionStore {
    /// Open (or create) the database, apply the schema if it is new, begin a
    /// run and start the writer thread.
    #[tracing::instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let ddl = load_schema(config.schema_path.as_deref())?;

        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::init("create database directory", e))?;
            }
        }

        let first_time = !config.db_path.exists();
        let conn = SharedConnection::open(&config.db_path, config.busy_timeout)
            .map_err(|e| StoreError::init("open database", e))?;

        let run_id = conn
            .with(|c| -> Result<i64, StoreError> {
                if first_time || needs_schema(c).map_err(SchemaError::from)? {
                    initialize_schema(c, &ddl)?;
                    tracing::info!("Schema applied");
                } else {
                    verify_schema(c)?;
                }
                begin_run(c).map_err(|e| StoreError::init("begin run", e))
            })
            .unwrap_or(Err(StoreError::Closed))?;

        let writer = Writer::spawn(conn.clone(), run_id, config.batch)
            .map_err(|e| StoreError::init("spawn writer thread", e))?;

        tracing::info!(
            run_id,
            first_time,
            max_batch_size = config.batch.max_batch_size,
            flush_interval_ms = config.batch.flush_interval.as_millis() as u64,
            "Detection store opened"
        );

        Ok(Self {
            db_path: config.db_path,
            run_id,
            conn,
            stats: writer.stats_recorder(),
            handle: RwLock::new(Some(writer.handle())),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Open the database at `path` with default settings.
    pub fn open_path<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        Self::open(StoreConfig::new(path))
    }

    /// Id of the run this store writes.
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Path of the database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Register a frame of this run. Blocks on one storage transaction.
    ///
    /// The first frame recorded also sets the run's frame dimensions.
    pub fn record_frame(&self, frame_id: i64, width: u32, height: u32) -> Result<(), StoreError> {
        self.conn
            .with(|c| record_frame(c, self.run_id, frame_id, width, height))
            .ok_or(StoreError::Closed)?
            .map_err(|source| StoreError::Registration { frame_id, source })?;

        tracing::debug!(run_id = self.run_id, frame_id, width, height, "Frame recorded");
        Ok(())
    }

    /// Queue a detection for the writer and return immediately.
    ///
    /// The frame it references must already be registered. Storage errors
    /// for this row surface in [`stats`](Self::stats) and the log, never here.
    pub fn enqueue_detection(&self, detection: Detection) -> Result<(), StoreError> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let handle = guard.as_ref().ok_or(StoreError::Closed)?;
        handle.insert(detection).map_err(|_| StoreError::Closed)
    }

    /// Block until every detection queued before this call has been flushed.
    pub fn flush(&self) -> Result<(), StoreError> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let handle = guard.as_ref().ok_or(StoreError::Closed)?;
        handle.flush().map_err(|_| StoreError::Closed)
    }

    /// Detections queued but not yet taken by the writer thread.
    pub fn queue_depth(&self) -> usize {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, WriterHandle::queue_depth)
    }

    /// Writer counters so far.
    pub fn stats(&self) -> WriterStats {
        self.stats.snapshot()
    }

    /// True once [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting detections, wait for the writer to flush everything
    /// queued, then release the connection.
    ///
    /// Concurrent and repeated calls wait for the first one to finish and then
    /// return the same counters.
    pub fn close(&self) -> Result<WriterStats, StoreError> {
        let mut writer_slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = writer_slot.take() else {
            return Ok(self.stats());
        };

        let pending = {
            let mut slot = self.handle.write().unwrap_or_else(PoisonError::into_inner);
            slot.take().map_or(0, |handle| {
                let pending = handle.queue_depth();
                // Nothing can be queued behind this marker.
                let _ = handle.shutdown();
                pending
            })
        };

        tracing::info!(
            run_id = self.run_id,
            queue_depth = pending,
            "Closing detection store, draining write queue"
        );

        let joined = writer.join();
        if let Err(e) = self.conn.release() {
            tracing::warn!(error = %e, "Failed to close database connection cleanly");
        }
        let stats = joined.map_err(|e| match e {
            WriterError::ThreadPanic | WriterError::ChannelClosed => StoreError::WorkerPanicked,
        })?;

        tracing::info!(
            run_id = self.run_id,
            rows_committed = stats.rows_committed,
            batches_committed = stats.batches_committed,
            batches_failed = stats.batches_failed,
            rows_dropped = stats.rows_dropped,
            "Detection store closed"
        );
        Ok(stats)
    }
}

impl Drop for DetectionStore {
    fn drop(&mut self) {
        let running = self
            .writer
            .get_mut()
            .map_or_else(|e| e.into_inner().is_some(), |w| w.is_some());
        if running {
            tracing::warn!(run_id = self.run_id, "Detection store dropped without close");
            if let Err(e) = self.close() {
                tracing::error!(error = %e, "Failed to drain detection store on drop");
            }
        }
    }
}
