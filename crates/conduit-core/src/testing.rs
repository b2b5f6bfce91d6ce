//! In-memory tracing for tests.
//!
//! Each [`TestTracer`] owns its own provider, so tests never swap the
//! process-wide tracer and can run in parallel.

use std::collections::HashMap;

use opentelemetry::Value;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

use crate::span::SpanFactory;

pub struct TestTracer {
    exporter: InMemorySpanExporter,
    provider: SdkTracerProvider,
}

impl TestTracer {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        Self { exporter, provider }
    }

    /// Span factory bound to this tracer, propagating W3C trace context.
    pub fn factory(&self) -> SpanFactory {
        SpanFactory::new(self.provider.tracer("conduit-test"))
            .with_propagator(TraceContextPropagator::new())
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().unwrap_or_default()
    }

    pub fn reset(&self) {
        self.exporter.reset();
    }
}

impl Default for TestTracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Attributes of a finished span keyed by name.
pub fn span_tags(span: &SpanData) -> HashMap<String, Value> {
    span.attributes
        .iter()
        .map(|kv| (kv.key.as_str().to_string(), kv.value.clone()))
        .collect()
}
