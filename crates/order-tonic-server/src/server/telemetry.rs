//! # Telemetry Features
//!
//! Console logging is always on. Distributed tracing and metrics are opt-in
//! through cargo features and exported via OpenTelemetry.
//!
//! ## Feature matrix
//!
//! - `tracing`: Handler spans, exported through an OpenTelemetry tracer. The
//!   W3C trace context sent by callers in gRPC metadata becomes the parent of
//!   the handler span.
//! - `metrics`: OpenTelemetry counters and histograms for requests, streams,
//!   stored orders and dispatched shipments.
//! - `otlp`: Export over OTLP/gRPC. Reads `OTLP_ENDPOINT`, `OTLP_HEADERS`
//!   (`key=value` pairs separated by commas) and `OTLP_COMPRESSION`.
//! - `stdout`: Export to stdout, useful for local debugging.
//!
//! ## Feature constraints
//!
//! - Exporters require at least one of `tracing` or `metrics`.
//! - `otlp` and `stdout` may be enabled together.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features tracing,metrics,otlp
//! cargo run --features tracing,stdout
//! ```

#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "otlp")]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "otlp")]
use tonic::metadata::MetadataMap as ExportMetadata;
#[cfg(feature = "otlp")]
use tonic::transport::ClientTlsConfig;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "order-management";

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every exporter. Errors are reported on stderr
    /// since the subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Console output is independent of the `stdout` exporter: this prints
    // events as log lines, the exporter dumps OpenTelemetry payloads.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Makes the caller's trace context (if any) the parent of the current span.
///
/// The metadata is only read; nothing is injected back into the call.
#[cfg(feature = "tracing")]
pub fn attach_remote_context(metadata: &tonic::metadata::MetadataMap) {
    use opentelemetry::propagation::{Extractor, TextMapPropagator};
    use tonic::metadata::KeyRef;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    struct MetadataExtractor<'a>(&'a tonic::metadata::MetadataMap);

    impl Extractor for MetadataExtractor<'_> {
        fn get(&self, key: &str) -> Option<&str> {
            self.0.get(key).and_then(|value| value.to_str().ok())
        }

        fn keys(&self) -> Vec<&str> {
            self.0
                .keys()
                .map(|key| match key {
                    KeyRef::Ascii(key) => key.as_str(),
                    KeyRef::Binary(key) => key.as_str(),
                })
                .collect()
        }
    }

    let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&MetadataExtractor(metadata))
    });
    let _ = tracing::Span::current().set_parent(parent);
}

#[cfg(not(feature = "tracing"))]
pub fn attach_remote_context(_metadata: &tonic::metadata::MetadataMap) {}

#[cfg(feature = "otlp")]
struct OtlpSettings {
    endpoint: String,
    metadata: ExportMetadata,
    compression: Compression,
}

#[cfg(feature = "otlp")]
fn otlp_settings() -> anyhow::Result<OtlpSettings> {
    use anyhow::Context;
    use std::str::FromStr;

    let endpoint = std::env::var("OTLP_ENDPOINT").context("missing `OTLP_ENDPOINT`")?;

    let mut metadata = ExportMetadata::new();
    if let Ok(headers) = std::env::var("OTLP_HEADERS") {
        for pair in headers.split(',').filter(|pair| !pair.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("malformed `OTLP_HEADERS` entry `{pair}`"))?;
            let key = tonic::metadata::AsciiMetadataKey::from_bytes(key.trim().as_bytes())
                .with_context(|| format!("invalid header name `{key}`"))?;
            metadata.insert(key, value.trim().parse().context("invalid header value")?);
        }
    }

    let compression = match std::env::var("OTLP_COMPRESSION") {
        Ok(raw) => Compression::from_str(&raw.to_ascii_lowercase())?,
        Err(_) => Compression::Gzip,
    };

    Ok(OtlpSettings {
        endpoint,
        metadata,
        compression,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = otlp_settings()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch_processor(
        opentelemetry_stdout::SpanExporter::default(),
    ));

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = otlp_settings()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "otlp")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "metrics")]
struct MetricHandles {
    requests: Counter<u64>,
    streams_inflight: UpDownCounter<i64>,
    stream_errors: Counter<u64>,
    stream_duration_ms: Histogram<f64>,
    orders_stored: Counter<u64>,
    shipments_dispatched: Counter<u64>,
    orders_per_shipment: Histogram<f64>,
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<MetricHandles> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = METRICS.set(MetricHandles {
        requests: meter
            .u64_counter("requests")
            .with_description("gRPC calls accepted, by method")
            .build(),
        streams_inflight: meter
            .i64_up_down_counter("streams_inflight")
            .with_description("Concurrent streaming calls")
            .build(),
        stream_errors: meter
            .u64_counter("errors")
            .with_description("Errored/cancelled streams")
            .build(),
        stream_duration_ms: meter
            .f64_histogram("stream_duration")
            .with_unit("ms")
            .with_description("End-to-end stream duration")
            .build(),
        orders_stored: meter
            .u64_counter("orders_stored")
            .with_description("Orders written by AddOrder and UpdateOrders")
            .build(),
        shipments_dispatched: meter
            .u64_counter("shipments_dispatched")
            .with_description("Combined shipments streamed to clients")
            .build(),
        orders_per_shipment: meter
            .f64_histogram("orders_per_shipment")
            .with_description("Orders carried by each combined shipment")
            .build(),
    });
}

// The helpers below compile to no-ops when metrics are disabled.

#[cfg(feature = "metrics")]
pub fn increment_requests(method: &'static str) {
    if let Some(m) = METRICS.get() {
        m.requests.add(1, &[KeyValue::new("rpc.method", method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests(_method: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_streams_inflight() {
    if let Some(m) = METRICS.get() {
        m.streams_inflight.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_streams_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_streams_inflight() {
    if let Some(m) = METRICS.get() {
        m.streams_inflight.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_streams_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_stream_errors() {
    if let Some(m) = METRICS.get() {
        m.stream_errors.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_stream_errors() {}

#[cfg(feature = "metrics")]
pub fn record_stream_duration(duration_ms: f64) {
    if let Some(m) = METRICS.get() {
        m.stream_duration_ms.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_stream_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_orders_stored(count: u64) {
    if let Some(m) = METRICS.get() {
        m.orders_stored.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_orders_stored(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn record_shipment_dispatched(orders: usize) {
    if let Some(m) = METRICS.get() {
        m.shipments_dispatched.add(1, &[]);
        m.orders_per_shipment.record(orders as f64, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_shipment_dispatched(_orders: usize) {}
