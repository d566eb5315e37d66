//! Tracing and OpenTelemetry bootstrap, shared by the supervisor and every
//! child worker process.

use crate::config::TelemetryConfig;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Initialize tracing for a process running attached to a terminal.
///
/// Returns an `SdkTracerProvider` when OTLP export is configured; the
/// caller must hold it for the process lifetime and call `.shutdown()`
/// before exit so the batch exporter flushes.
pub fn init_foreground(debug: bool, telemetry: &TelemetryConfig) -> Option<SdkTracerProvider> {
    let filter = build_env_filter(debug);
    let fmt_layer = tracing_subscriber::fmt::layer().compact();
    install(filter, fmt_layer, telemetry)
}

fn install<L>(
    filter: tracing_subscriber::EnvFilter,
    fmt_layer: L,
    telemetry: &TelemetryConfig,
) -> Option<SdkTracerProvider>
where
    L: tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync,
{
    match build_otlp_provider(telemetry) {
        Some(provider) => {
            let tracer = provider.tracer(telemetry.service_name.clone());
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();
            Some(provider)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
            None
        }
    }
}

fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if debug { "debug" } else { "info" }))
}

/// Build an OTLP `SdkTracerProvider` when `FLEETCTL_OTLP_ENDPOINT` (or the
/// standard `OTEL_EXPORTER_OTLP_ENDPOINT`) is set. Returns `None` so the
/// OTel layer can be omitted entirely when not configured.
fn build_otlp_provider(telemetry: &TelemetryConfig) -> Option<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig as _;

    let endpoint = telemetry.otlp_endpoint.as_deref()?;
    let endpoint = if endpoint.ends_with("/v1/traces") {
        endpoint.to_owned()
    } else {
        format!("{}/v1/traces", endpoint.trim_end_matches('/'))
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|error| tracing::warn!(%error, "failed to build OTLP exporter"))
        .ok()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(telemetry.service_name.clone())
        .build();

    let sampler: opentelemetry_sdk::trace::Sampler =
        if (telemetry.sample_rate - 1.0).abs() < f64::EPSILON {
            opentelemetry_sdk::trace::Sampler::AlwaysOn
        } else {
            opentelemetry_sdk::trace::Sampler::ParentBased(Box::new(
                opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(telemetry.sample_rate),
            ))
        };

    // The async-runtime-aware batch processor drives the export future via
    // tokio::spawn; the sync variant would need a bare OS thread with its
    // own executor, which reqwest's internal tokio::time::sleep calls can't
    // use.
    let batch_processor =
        opentelemetry_sdk::trace::span_processor_with_async_runtime::BatchSpanProcessor::builder(
            exporter,
            opentelemetry_sdk::runtime::Tokio,
        )
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_span_processor(batch_processor)
            .with_resource(resource)
            .with_sampler(sampler)
            .build(),
    )
}
