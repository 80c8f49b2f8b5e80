//! Trackstore: asynchronous batched persistence for object-detection streams.
//!
//! A real-time vision pipeline produces one detection per tracked object per
//! frame. Trackstore persists them into SQLite without blocking the producer:
//! detections go into an unbounded queue and a single writer thread commits
//! them in transactions bounded by size and age.
//!
//! # Architecture
//!
//! - **Runs and frames** are registered synchronously and return immediately
//!   after their own transaction commits
//! - **Detections** are queued and committed by one writer thread in batches
//!   of at most `B_max` rows, at least every `T_flush`
//! - **Durable**: WAL journal with `synchronous=NORMAL`; a crash loses at most
//!   the batch in flight
//! - **Observable**: tracing logs and OpenTelemetry metrics, including the
//!   queue depth
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`ingest`]: NDJSON event ingestion used by the binary
//! - [`model`]: Row types
//! - [`observability`]: Metrics and tracing setup
//! - [`storage`]: Schema, writer thread, store facade and readers
//!
//! # Example
//!
//! ```no_run
//! use trackstore::model::Detection;
//! use trackstore::storage::DetectionStore;
//!
//! let store = DetectionStore::open_path("data/detections.sqlite3")?;
//! store.record_frame(1, 1920, 1080)?;
//! store.enqueue_detection(Detection {
//!     track_id: 1,
//!     frame_id: 1,
//!     class_name: "car".into(),
//!     confidence: 0.7,
//!     xmin: 100.0,
//!     ymin: 100.0,
//!     xmax: 300.0,
//!     ymax: 300.0,
//! })?;
//! store.close()?;
//! # Ok::<(), trackstore::storage::StoreError>(())
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::store::StoreConfig is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::cast_possible_truncation,   // Millisecond durations fit in u64
    clippy::similar_names               // xmin/ymin/xmax/ymax are fine
)]

pub mod config;
pub mod ingest;
pub mod model;
pub mod observability;
pub mod storage;

pub use model::Detection;
pub use storage::{DetectionStore, StoreConfig, StoreError};
