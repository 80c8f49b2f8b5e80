//! Dedicated writer thread with group commit.
//!
//! Producers hand detections to the writer through an unbounded
//! crossbeam channel and return immediately. The writer thread is the only
//! place detection rows are written: it accumulates a batch and commits it in
//! one transaction when the batch is full or the flush interval has passed.
//!
//! A batch whose transaction fails is rolled back and dropped. The failure
//! is logged and counted in [`WriterStats`]; the writer keeps running.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::{params, Connection, TransactionBehavior};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;

use super::batch::{BatchAccumulator, BatchConfig};
use super::connection::SharedConnection;
use crate::model::Detection;
use crate::observability::metrics::{record_enqueue, record_flush, record_queue_depth};

const INSERT_DETECTION_SQL: &str = "INSERT INTO detections
     (run_id, track_id, frame_id, class_name, confidence, xmin, ymin, xmax, ymax)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// A command sent to the writer thread.
#[derive(Debug)]
pub enum WriteCommand {
    /// Queue one detection row.
    Insert(Detection),
    /// Commit everything queued so far, then acknowledge.
    Flush(Sender<()>),
    /// Commit everything queued so far and exit.
    Shutdown,
}

/// Error type for writer handle operations.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Writer channel closed")]
    ChannelClosed,

    #[error("Writer thread panicked")]
    ThreadPanic,
}

/// A batch that could not be committed. Its detections are dropped.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("batch of {rows} detections rolled back: {source}")]
    RolledBack {
        rows: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("batch of {rows} detections dropped: connection already released")]
    ConnectionReleased { rows: usize },
}

impl FlushError {
    /// Number of detections lost with the batch.
    pub fn rows(&self) -> usize {
        match self {
            Self::RolledBack { rows, .. } | Self::ConnectionReleased { rows } => *rows,
        }
    }
}

/// Counters describing the writer's work so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriterStats {
    pub detections_enqueued: u64,
    pub rows_committed: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub rows_dropped: u64,
    /// Message of the most recent [`FlushError`].
    pub last_error: Option<String>,
}

/// Live counters shared between producers and the writer thread.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    detections_enqueued: AtomicU64,
    rows_committed: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    rows_dropped: AtomicU64,
    last_error: Mutex<Option<String>>,
    /// Detections sent but not yet received by the writer thread.
    queued: AtomicUsize,
}

impl StatsRecorder {
    fn record_enqueue(&self) {
        self.detections_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    fn record_commit(&self, rows: usize) {
        self.rows_committed.fetch_add(rows as u64, Ordering::Relaxed);
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, error: &FlushError) {
        self.rows_dropped
            .fetch_add(error.rows() as u64, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    /// Read a consistent-enough snapshot of the counters.
    pub fn snapshot(&self) -> WriterStats {
        WriterStats {
            detections_enqueued: self.detections_enqueued.load(Ordering::Relaxed),
            rows_committed: self.rows_committed.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Producer-side handle to the writer thread.
#[derive(Clone)]
pub struct WriterHandle {
    tx: Sender<WriteCommand>,
    stats: Arc<StatsRecorder>,
}

impl WriterHandle {
    /// Queue a detection. Never touches storage.
    pub fn insert(&self, detection: Detection) -> Result<(), WriterError> {
        // Counted before sending so the writer never sees it below zero.
        let depth = self.stats.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(WriteCommand::Insert(detection)).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(WriterError::ChannelClosed);
        }
        self.stats.record_enqueue();
        record_enqueue();
        record_queue_depth(depth);
        Ok(())
    }

    /// Block until everything queued before this call has been flushed.
    ///
    /// Returns after the flush attempt whether or not it committed.
    pub fn flush(&self) -> Result<(), WriterError> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(WriteCommand::Flush(ack_tx))
            .map_err(|_| WriterError::ChannelClosed)?;
        ack_rx.recv().map_err(|_| WriterError::ChannelClosed)
    }

    /// Ask the writer to flush and exit.
    pub fn shutdown(&self) -> Result<(), WriterError> {
        self.tx
            .send(WriteCommand::Shutdown)
            .map_err(|_| WriterError::ChannelClosed)
    }

    /// Number of detections waiting for the writer.
    ///
    /// Pending `Flush`/`Shutdown` commands are not counted, nor are
    /// detections the writer has already taken into its batch.
    pub fn queue_depth(&self) -> usize {
        self.stats.queued()
    }
}

/// The writer thread.
pub struct Writer {
    handle: WriterHandle,
    thread: JoinHandle<WriterStats>,
}

impl Writer {
    /// Spawn the writer thread for `run_id` on the shared connection.
    pub fn spawn(
        conn: SharedConnection,
        run_id: i64,
        config: BatchConfig,
    ) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let stats = Arc::new(StatsRecorder::default());
        let sink = BatchSink {
            conn,
            run_id,
            stats: Arc::clone(&stats),
        };

        let thread = thread::Builder::new()
            .name("trackstore-writer".to_string())
            .spawn(move || writer_loop(sink, rx, config))?;

        Ok(Self {
            handle: WriterHandle { tx, stats },
            thread,
        })
    }

    /// Get a producer handle.
    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Counters shared with the writer thread; readable after it exits.
    pub fn stats_recorder(&self) -> Arc<StatsRecorder> {
        Arc::clone(&self.handle.stats)
    }

    /// Wait for the writer thread to exit and return its final counters.
    ///
    /// Blocks until a [`WriteCommand::Shutdown`] has been processed or every
    /// sender is gone.
    pub fn join(self) -> Result<WriterStats, WriterError> {
        let Self { handle, thread } = self;
        drop(handle);
        thread.join().map_err(|_| WriterError::ThreadPanic)
    }
}

/// Where batches go: one run on one connection.
struct BatchSink {
    conn: SharedConnection,
    run_id: i64,
    stats: Arc<StatsRecorder>,
}

impl BatchSink {
    fn flush(&self, batch: &mut BatchAccumulator<Detection>) {
        if batch.is_empty() {
            return;
        }

        let items = batch.drain();
        let rows = items.len();
        let start = Instant::now();
        let result = self.commit(&items);
        let latency = start.elapsed().as_secs_f64();
        let queue_depth = self.stats.queued();

        match result {
            Ok(()) => {
                self.stats.record_commit(rows);
                record_flush(rows, latency, true);
                tracing::debug!(
                    run_id = self.run_id,
                    rows,
                    latency_ms = latency * 1000.0,
                    queue_depth,
                    "Batch committed"
                );
            }
            Err(e) => {
                self.stats.record_failure(&e);
                record_flush(rows, latency, false);
                tracing::error!(
                    run_id = self.run_id,
                    rows,
                    error = %e,
                    "Batch not committed, dropping detections"
                );
            }
        }
        record_queue_depth(queue_depth);
    }

    fn commit(&self, items: &[Detection]) -> Result<(), FlushError> {
        let rows = items.len();
        self.conn
            .with(|conn| insert_detections(conn, self.run_id, items))
            .unwrap_or(Err(FlushError::ConnectionReleased { rows }))
    }
}

/// Insert `items` in order inside one `BEGIN IMMEDIATE` transaction.
fn insert_detections(
    conn: &mut Connection,
    run_id: i64,
    items: &[Detection],
) -> Result<(), FlushError> {
    let rows = items.len();
    let fail = |source| FlushError::RolledBack { rows, source };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(fail)?;
    {
        let mut stmt = tx.prepare_cached(INSERT_DETECTION_SQL).map_err(fail)?;
        for d in items {
            stmt.execute(params![
                run_id,
                d.track_id,
                d.frame_id,
                d.class_name,
                d.confidence,
                d.xmin,
                d.ymin,
                d.xmax,
                d.ymax,
            ])
            .map_err(fail)?;
        }
    }
    tx.commit().map_err(fail)
}

fn writer_loop(sink: BatchSink, rx: Receiver<WriteCommand>, config: BatchConfig) -> WriterStats {
    let mut batch = BatchAccumulator::new(config);

    tracing::debug!(
        run_id = sink.run_id,
        max_batch_size = config.max_batch_size,
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        "Writer thread started"
    );

    loop {
        match rx.recv_timeout(batch.wait_timeout()) {
            Ok(WriteCommand::Insert(detection)) => {
                sink.stats.queued.fetch_sub(1, Ordering::Relaxed);
                if batch.push(detection) {
                    sink.flush(&mut batch);
                }
            }
            Ok(WriteCommand::Flush(ack)) => {
                sink.flush(&mut batch);
                let _ = ack.send(());
            }
            Ok(WriteCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                sink.flush(&mut batch);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if batch.is_ready() {
                    sink.flush(&mut batch);
                }
            }
        }
    }

    let stats = sink.stats.snapshot();
    tracing::debug!(
        run_id = sink.run_id,
        rows_committed = stats.rows_committed,
        batches_failed = stats.batches_failed,
        "Writer thread stopped"
    );
    stats
}
