use std::time::Duration;

use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;

fn init_tracer(
    sink_url: &str,
    sampling_rate: f64,
    service_name: &str,
) -> Result<Tracer, opentelemetry::trace::TraceError> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    sampling_rate,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    Value::from(service_name.to_string()),
                )])),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(sink_url)
                .with_timeout(Duration::from_secs(3)),
        )
        .install_batch(runtime::Tokio)
}

/// Installs the global subscriber:
///   - stdout with a level configured by the RUST_LOG envvar (default=INFO)
///   - OpenTelemetry if OTEL_URL is set, for OTEL_LOG_LEVEL and higher
///
/// Must run inside the tokio runtime, the span exporter is spawned on it.
pub fn init(config: &Config) -> Result<(), opentelemetry::trace::TraceError> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );

    let otel_layer = match &config.otel_url {
        Some(url) => Some(OpenTelemetryLayer::new(init_tracer(
            url,
            config.otel_sampling_rate,
            &config.otel_service_name,
        )?)),
        None => None,
    }
    .with_filter(LevelFilter::from_level(config.otel_log_level));

    tracing_subscriber::registry()
        .with(log_layer)
        .with(otel_layer)
        .init();

    Ok(())
}

/// Flushes spans still buffered by the batch exporter.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
