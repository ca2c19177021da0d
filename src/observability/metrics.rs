//! OpenTelemetry metrics for buffered channels.
//!
//! Key metrics:
//! - weir_messages_sent_total: Counter for data sends
//! - weir_acks_received_total: Counter for successful acknowledgments
//! - weir_ack_latency_seconds: Histogram for send-to-ack round trips
//! - weir_errors_total: Counter for failures, by kind

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Weir metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of data messages sent.
    pub messages_sent: Counter<u64>,
    /// Total number of successful acknowledgments.
    pub acks_received: Counter<u64>,
    /// Histogram of send-to-ack latency in seconds.
    pub ack_latency: Histogram<f64>,
    /// Total number of errors (timeouts, remote failures, protocol violations).
    pub errors: Counter<u64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            messages_sent: meter
                .u64_counter("weir_messages_sent_total")
                .with_description("Total number of data messages sent")
                .with_unit("1")
                .init(),
            acks_received: meter
                .u64_counter("weir_acks_received_total")
                .with_description("Total number of successful acknowledgments")
                .with_unit("1")
                .init(),
            ack_latency: meter
                .f64_histogram("weir_ack_latency_seconds")
                .with_description("Latency from send to acknowledgment")
                .with_unit("s")
                .init(),
            errors: meter
                .u64_counter("weir_errors_total")
                .with_description("Total number of channel errors")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
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
                    set_manual_provider();
                }
            }
        } else {
            // Metrics are recorded but not exported.
            set_manual_provider();
        }

        let meter = global::meter("weir");
        Metrics::new(&meter)
    });
}

fn set_manual_provider() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}


/// Record a data send.
pub fn record_send(channel: &str) {
    if let Some(m) = METRICS.get() {
        m.messages_sent
            .add(1, &[KeyValue::new("channel", channel.to_string())]);
    }
}

/// Record a successful acknowledgment and its round-trip latency.
pub fn record_ack(channel: &str, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("channel", channel.to_string())];
        m.acks_received.add(1, &attrs);
        m.ack_latency.record(latency_seconds, &attrs);
    }
}

/// Record an error of the given kind.
pub fn record_error(channel: &str, kind: &'static str) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("channel", channel.to_string()),
            KeyValue::new("kind", kind),
        ];
        m.errors.add(1, &attrs);
    }
}
