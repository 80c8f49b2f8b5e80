//! OpenTelemetry metrics for the write pipeline.
//!
//! Key metrics:
//! - trackstore_detections_enqueued_total: Counter for accepted detections
//! - trackstore_rows_committed_total: Counter for rows made durable
//! - trackstore_flush_total: Counter for batch transactions, by outcome
//! - trackstore_flush_latency_seconds: Histogram for batch commit latency
//! - trackstore_batch_size: Histogram for rows per batch
//! - trackstore_queue_depth: Gauge for detections waiting for the writer

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Trackstore metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of detections accepted by the queue.
    pub detections_enqueued: Counter<u64>,
    /// Total number of detection rows committed.
    pub rows_committed: Counter<u64>,
    /// Batch transactions, labelled `outcome = ok | error`.
    pub flush_total: Counter<u64>,
    /// Histogram of batch transaction latency in seconds.
    pub flush_latency: Histogram<f64>,
    /// Histogram of rows per batch.
    pub batch_size: Histogram<u64>,
    /// Detections queued but not yet picked up by the writer.
    pub queue_depth: Gauge<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            detections_enqueued: meter
                .u64_counter("trackstore_detections_enqueued_total")
                .with_description("Detections accepted by the write queue")
                .with_unit("1")
                .init(),
            rows_committed: meter
                .u64_counter("trackstore_rows_committed_total")
                .with_description("Detection rows committed to storage")
                .with_unit("1")
                .init(),
            flush_total: meter
                .u64_counter("trackstore_flush_total")
                .with_description("Batch transactions by outcome")
                .with_unit("1")
                .init(),
            flush_latency: meter
                .f64_histogram("trackstore_flush_latency_seconds")
                .with_description("Batch transaction latency from begin to commit")
                .with_unit("s")
                .init(),
            batch_size: meter
                .u64_histogram("trackstore_batch_size")
                .with_description("Rows per batch transaction")
                .with_unit("1")
                .init(),
            queue_depth: meter
                .u64_gauge("trackstore_queue_depth")
                .with_description("Detections waiting for the writer")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
/// With an endpoint the OTLP exporter is used, which requires a running
/// Tokio runtime.
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_manual_provider();
                }
            }
        } else {
            install_manual_provider();
        }

        let meter = global::meter("trackstore");
        Metrics::new(&meter)
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

// Metrics are recorded but never exported.
fn install_manual_provider() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record one accepted detection.
pub fn record_enqueue() {
    if let Some(m) = METRICS.get() {
        m.detections_enqueued.add(1, &[]);
    }
}

/// Record the outcome of one batch transaction.
pub fn record_flush(rows: usize, latency_seconds: f64, committed: bool) {
    if let Some(m) = METRICS.get() {
        let outcome = if committed { "ok" } else { "error" };
        let attrs = [KeyValue::new("outcome", outcome)];
        m.flush_total.add(1, &attrs);
        m.flush_latency.record(latency_seconds, &attrs);
        m.batch_size.record(rows as u64, &attrs);
        if committed {
            m.rows_committed.add(rows as u64, &[]);
        }
    }
}

/// Record the current write queue depth.
pub fn record_queue_depth(depth: usize) {
    if let Some(m) = METRICS.get() {
        m.queue_depth.record(depth as u64, &[]);
    }
}
