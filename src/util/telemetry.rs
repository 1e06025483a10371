use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::Env;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

const DEFAULT_FILTER: &str = "slurpotron=info,reqwest=warn,info";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Console logging, plus OTLP export of traces, logs and metrics when a collector is configured
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub tracer_name: String,
    providers: Option<Providers>,
}

#[derive(Debug, Clone)]
struct Providers {
    logger_provider: SdkLoggerProvider,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    pub fn new(env: &Env) -> Result<Telemetry> {
        let tracer_name = env.service_name.clone();

        let providers = match env.otel_exporter_otlp_endpoint.as_deref() {
            Some(collector_url) => {
                let base_resource = base_attrs(&env.service_name, env!("CARGO_PKG_VERSION"));

                Some(Providers {
                    logger_provider: build_logger_provider(collector_url, base_resource.clone())?,
                    meter_provider: build_meter_provider(collector_url, base_resource.clone())?,
                    tracer_provider: build_tracer_provider(collector_url, base_resource)?,
                })
            }
            None => None,
        };

        Ok(Self {
            tracer_name,
            providers,
        })
    }

    /// Console-only telemetry, for when the environment could not be read
    pub fn console() -> Telemetry {
        Self {
            tracer_name: String::from("slurpotron"),
            providers: None,
        }
    }

    pub fn register(self) -> Self {
        let trace_layer = self.providers.as_ref().map(|providers| {
            global::set_tracer_provider(providers.tracer_provider.clone());
            let tracer = global::tracer(self.tracer_name.clone());
            tracing_opentelemetry::layer().with_tracer(tracer)
        });

        let log_layer = self
            .providers
            .as_ref()
            .map(|providers| OpenTelemetryTracingBridge::new(&providers.logger_provider));

        let meter_layer = self.providers.as_ref().map(|providers| {
            tracing_opentelemetry::MetricsLayer::new(providers.meter_provider.clone())
        });

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(log_layer)
            .with(meter_layer)
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        tracing::debug!(otlp = self.providers.is_some(), "telemetry registered");
        self
    }

    pub fn shutdown(self) {
        let Some(providers) = self.providers else {
            return;
        };

        if let Err(e) = providers.meter_provider.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Err(e) = providers.logger_provider.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Err(e) = providers.tracer_provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

pub fn build_logger_provider(
    collector_url: &str,
    base_resource: Resource,
) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

pub fn build_tracer_provider(
    collector_url: &str,
    base_resource: Resource,
) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

pub fn build_meter_provider(
    collector_url: &str,
    base_resource: Resource,
) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: &str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name.to_string()),
            KeyValue::new("service.version", version),
        ])
        .build()
}
