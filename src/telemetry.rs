use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::TelemetryConfig;
use crate::messaging::TracePropagator;

// ============================================================================
// Telemetry - logging subscriber and the injected tracing handle
// ============================================================================
//
// Two separate concerns:
// - `init_telemetry` installs the `tracing` subscriber (fmt + env filter,
//   plus an OpenTelemetry layer when an OTLP endpoint is configured)
// - `Telemetry` is the handle the pipeline starts spans and propagates
//   context with. It is passed in explicitly, never read from a global,
//   so tests can hand in a provider backed by an in-memory exporter.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct Telemetry {
    tracer: SdkTracer,
    propagator: TracePropagator,
}

impl Telemetry {
    pub fn from_provider(provider: &SdkTracerProvider, service_name: &str) -> Self {
        Self {
            tracer: provider.tracer(service_name.to_string()),
            propagator: TracePropagator::new(),
        }
    }

    /// Spans are created and sampled but never exported
    pub fn disabled() -> Self {
        Self::from_provider(&SdkTracerProvider::builder().build(), "disabled")
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    pub fn propagator(&self) -> &TracePropagator {
        &self.propagator
    }
}

/// Guard that shuts down the tracer provider on drop.
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if !self.exporting {
            return;
        }
        if let Err(e) = self.provider.shutdown() {
            eprintln!("Error shutting down tracer provider: {e:?}");
        }
    }
}

/// Install the global `tracing` subscriber and build the tracing handle.
///
/// Default filter: `info,order_pipeline=debug`, overridden by `RUST_LOG`.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<(Telemetry, TelemetryGuard)> {
    let env_filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new("info,order_pipeline=debug"));

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);

    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        let telemetry = Telemetry::disabled();
        let provider = SdkTracerProvider::builder().build();
        return Ok((
            telemetry,
            TelemetryGuard {
                provider,
                exporting: false,
            },
        ));
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    let otel_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::info!(
        service_name = %config.service_name,
        endpoint = %endpoint,
        "OpenTelemetry initialized"
    );

    Ok((
        Telemetry::from_provider(&provider, &config.service_name),
        TelemetryGuard {
            provider,
            exporting: true,
        },
    ))
}
