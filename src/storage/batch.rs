//! Flush-trigger bookkeeping for the batch writer.
//!
//! A batch is flushed when either:
//! - it holds `max_batch_size` items
//! - it is non-empty and `flush_interval` has passed since the last flush

use std::time::{Duration, Instant};

/// Default maximum number of detections per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Default maximum time between flushes of a non-empty batch.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for batch commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of items in a batch
    pub max_batch_size: usize,
    /// Maximum age of the flush timer before a non-empty batch is committed
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl BatchConfig {
    /// Create a BatchConfig from application config values.
    ///
    /// Zero values are raised to one item and one millisecond.
    pub fn from_config(batch_size: usize, flush_interval_ms: u64) -> Self {
        Self {
            max_batch_size: batch_size.max(1),
            flush_interval: Duration::from_millis(flush_interval_ms.max(1)),
        }
    }
}

/// Batch accumulator for queued write operations.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    config: BatchConfig,
    items: Vec<T>,
    last_flush: Instant,
}

impl<T> BatchAccumulator<T> {
    /// Create an empty accumulator; the flush timer starts now.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            items: Vec::with_capacity(config.max_batch_size),
            last_flush: Instant::now(),
        }
    }

    /// Add an item to the batch.
    ///
    /// Returns true if the batch is now ready to flush.
    pub fn push(&mut self, item: T) -> bool {
        self.items.push(item);
        self.is_ready()
    }

    /// Check if the batch is ready to flush.
    pub fn is_ready(&self) -> bool {
        if self.items.is_empty() {
            return false;
        }

        self.items.len() >= self.config.max_batch_size
            || self.last_flush.elapsed() >= self.config.flush_interval
    }

    /// How long the writer may block waiting for the next item.
    ///
    /// Never longer than `flush_interval`; zero once a non-empty batch is due.
    pub fn wait_timeout(&self) -> Duration {
        if self.items.is_empty() {
            return self.config.flush_interval;
        }
        self.config
            .flush_interval
            .saturating_sub(self.last_flush.elapsed())
    }

    /// Take all accumulated items and restart the flush timer.
    pub fn drain(&mut self) -> Vec<T> {
        self.last_flush = Instant::now();
        std::mem::replace(
            &mut self.items,
            Vec::with_capacity(self.config.max_batch_size),
        )
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
