// Telemetry and observability with OpenTelemetry support
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing and OpenTelemetry metrics.
///
/// Sets up:
/// - Tracing subscriber with `EnvFilter` (default `info`) and an fmt layer
/// - Metrics exporter to an OTLP endpoint
/// - Resource attributes (service.name, service.version)
///
/// # Environment Variables
///
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME`: Service name (default: weknora-core)
/// - `RUST_LOG`: tracing filter directives
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "weknora-core".to_string());

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    // Initialize metrics provider with OTLP exporter
    let meter_provider = opentelemetry_otlp::new_pipeline()
        .metrics(opentelemetry_sdk::runtime::Tokio)
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(otlp_endpoint.clone()),
        )
        .with_resource(resource)
        .with_period(std::time::Duration::from_secs(10))
        .build()?;

    opentelemetry::global::set_meter_provider(meter_provider);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!(
        target: "telemetry",
        otlp_endpoint = %otlp_endpoint,
        service_name = %service_name,
        "Telemetry initialized"
    );

    Ok(())
}

/// Flush pending metrics before application exit.
pub fn shutdown_telemetry() {
    info!(target: "telemetry", "Shutting down telemetry");
    opentelemetry::global::shutdown_tracer_provider();
}
