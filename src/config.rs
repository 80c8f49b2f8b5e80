//! Configuration parsing for the trackstore binary.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::batch::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};
use crate::storage::store::{DEFAULT_BUSY_TIMEOUT, DEFAULT_DB_PATH};
use crate::storage::{BatchConfig, StoreConfig};

/// Trackstore: batched SQLite persistence for object detections.
#[derive(Parser, Debug, Clone)]
#[command(name = "trackstore")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// SQLite database file
    #[arg(short, long, env = "TRACKSTORE_DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Maximum detections per transaction
    #[arg(long, env = "TRACKSTORE_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Maximum milliseconds between flushes of a non-empty batch
    #[arg(
        long,
        env = "TRACKSTORE_FLUSH_INTERVAL_MS",
        default_value_t = DEFAULT_FLUSH_INTERVAL.as_millis() as u64
    )]
    pub flush_interval_ms: u64,

    /// Schema DDL file to use instead of the built-in schema
    #[arg(long, env = "TRACKSTORE_SCHEMA_PATH")]
    pub schema_path: Option<PathBuf>,

    /// Milliseconds a transaction waits for the database write lock
    #[arg(
        long,
        env = "TRACKSTORE_BUSY_TIMEOUT_MS",
        default_value_t = DEFAULT_BUSY_TIMEOUT.as_millis() as u64
    )]
    pub busy_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Batch settings for the writer.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::from_config(self.batch_size, self.flush_interval_ms)
    }

    /// Settings for opening the store.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            db_path: self.db_path.clone(),
            batch: self.batch_config(),
            schema_path: self.schema_path.clone(),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            schema_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
            log_level: "info".into(),
            otel_endpoint: None,
        }
    }
}
