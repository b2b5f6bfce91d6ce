use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use super::TelemetrySettings;
use crate::span::SpanFactory;

/// Keeps the tracer provider alive; dropping it flushes and shuts it down.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    version: String,
}

impl TelemetryGuard {
    /// Span factory over the installed provider, tagged with the service version.
    ///
    /// With OpenTelemetry disabled the global no-op tracer is used.
    pub fn span_factory(&self, name: &'static str) -> SpanFactory {
        let spans = match &self.tracer_provider {
            Some(provider) => SpanFactory::new(provider.tracer(name)),
            None => SpanFactory::global(name),
        };
        spans.with_version(self.version.clone())
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown tracer provider: {:?}", e);
        }
    }
}

/// Install the global subscriber, propagator and tracer provider.
///
/// Keep the returned guard alive for the lifetime of the process. Fails when a
/// global subscriber is already installed.
pub fn init_telemetry(settings: &TelemetrySettings) -> anyhow::Result<TelemetryGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let json = settings.log_format == "json";

    if !settings.enabled {
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry.with(fmt::layer().json()).try_init()?;
        } else {
            registry.with(fmt::layer()).try_init()?;
        }

        tracing::info!(
            otel.enabled = false,
            "Telemetry initialized (logging only, OpenTelemetry exporter disabled)"
        );
        return Ok(TelemetryGuard {
            tracer_provider: None,
            version: settings.service_version.clone(),
        });
    }

    let propagator = TextMapCompositePropagator::new(vec![Box::new(TraceContextPropagator::new())]);
    global::set_text_map_propagator(propagator);

    let resource = Resource::builder()
        .with_service_name(settings.service_name.clone())
        .with_attribute(KeyValue::new(
            SERVICE_VERSION,
            settings.service_version.clone(),
        ))
        .build();
    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("conduit"));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }

    tracing::info!(
        service.name = %settings.service_name,
        service.version = %settings.service_version,
        otel.enabled = true,
        "Telemetry initialized with OpenTelemetry exporter (stdout)"
    );

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        version: settings.service_version.clone(),
    })
}
