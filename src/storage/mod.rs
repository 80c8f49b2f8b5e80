//! SQLite storage layer for detections.
//!
//! Provides:
//! - Schema contract and synchronous run/frame registration
//! - A shared write connection with WAL journaling
//! - Dedicated writer thread with size/time-bounded group commit
//! - The `DetectionStore` facade that ties them together
//! - Read connection pool for the query side

pub mod batch;
pub mod connection;
pub mod reader;
pub mod schema;
pub mod store;
pub mod writer;

pub use batch::BatchConfig;
pub use reader::{ReaderError, ReaderPool, TrackQuery};
pub use store::{DetectionStore, StoreConfig, StoreError};
pub use writer::{FlushError, WriterStats};
