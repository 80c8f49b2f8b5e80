//! Trackstore: persist a detection event stream into SQLite.
//!
//! # Usage
//!
//! ```bash
//! detector | trackstore --db-path ./data/detections.sqlite3 --batch-size 200
//! ```
//!
//! Reads newline-delimited JSON events from stdin until EOF, SIGINT or
//! SIGTERM, then drains the write queue before exiting.
//!
//! Environment variables can also be used:
//! - `TRACKSTORE_DB_PATH`: SQLite database file
//! - `TRACKSTORE_BATCH_SIZE`: Maximum detections per transaction
//! - `TRACKSTORE_FLUSH_INTERVAL_MS`: Maximum time between flushes
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use std::io::BufReader;
use std::sync::Arc;
use tokio::sync::oneshot;
use trackstore::config::Config;
use trackstore::ingest::{ingest, IngestError, IngestSummary};
use trackstore::observability::metrics::init_metrics_with_endpoint;
use trackstore::observability::tracing::init_tracing;
use trackstore::storage::DetectionStore;

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), draining..."),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, draining..."),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT (Ctrl+C), draining...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received Ctrl+C, draining...");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    init_tracing(&config.log_level);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    let store = Arc::new(
        DetectionStore::open(config.store_config())
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );

    // Blocking stdin read; abandoned on signal.
    let (done_tx, done_rx) = oneshot::channel::<Result<IngestSummary, IngestError>>();
    let reader_store = Arc::clone(&store);
    std::thread::Builder::new()
        .name("trackstore-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let result = ingest(&reader_store, BufReader::new(stdin.lock()));
            let _ = done_tx.send(result);
        })
        .context("spawning stdin reader")?;

    tokio::select! {
        result = done_rx => match result {
            Ok(Ok(summary)) => tracing::info!(
                frames = summary.frames,
                detections = summary.detections,
                rejected_frames = summary.rejected_frames,
                malformed = summary.malformed,
                "Input finished"
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "Ingestion stopped"),
            Err(_) => tracing::error!("Stdin reader exited without a result"),
        },
        () = shutdown_signal() => {}
    }

    let close_store = Arc::clone(&store);
    let stats = tokio::task::spawn_blocking(move || close_store.close())
        .await
        .context("joining close task")?
        .context("closing store")?;

    tracing::info!(
        run_id = store.run_id(),
        db_path = %store.db_path().display(),
        rows_committed = stats.rows_committed,
        rows_dropped = stats.rows_dropped,
        "Trackstore shutdown complete"
    );
    Ok(())
}
