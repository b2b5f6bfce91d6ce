//! Span creation and finalization for outbound and inbound operations.
//!
//! [`SpanFactory`] owns the tracer it starts spans with, so call sites never
//! reach for the process-wide tracer implicitly. The only way to touch the
//! global is [`SpanFactory::global`], meant for binaries that installed their
//! provider once at startup.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::carrier::{Carrier, CarrierError, CheckedInjector};

pub const COMPONENT_TAG: &str = "component";
pub const SPAN_KIND_TAG: &str = "span.kind";
pub const ERROR_TAG: &str = "error";
pub const VERSION_TAG: &str = "version";

const DEFAULT_VERSION: &str = "dev";

/// Which side of a message exchange a span describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Producer,
    Consumer,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Producer => "producer",
            ComponentKind::Consumer => "consumer",
        }
    }
}

impl From<ComponentKind> for SpanKind {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Producer => SpanKind::Producer,
            ComponentKind::Consumer => SpanKind::Consumer,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Span name for a component talking to a specific destination.
pub fn operation_name(component: &str, discriminator: &str) -> String {
    format!("{component} {discriminator}")
}

#[derive(Clone)]
pub struct SpanFactory {
    tracer: Arc<BoxedTracer>,
    propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
    version: Cow<'static, str>,
}

impl SpanFactory {
    /// Build a factory around an explicitly supplied tracer.
    pub fn new<T>(tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        Self {
            tracer: Arc::new(BoxedTracer::new(Box::new(tracer))),
            propagator: None,
            version: Cow::Borrowed(DEFAULT_VERSION),
        }
    }

    /// Build a factory from the process-wide tracer provider.
    pub fn global(name: &'static str) -> Self {
        Self {
            tracer: Arc::new(global::tracer(name)),
            propagator: None,
            version: Cow::Borrowed(DEFAULT_VERSION),
        }
    }

    /// Use this propagator instead of the process-wide one.
    pub fn with_propagator<P>(mut self, propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagator = Some(Arc::new(propagator));
        self
    }

    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = version.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Start a span as a child of whatever span `parent` carries.
    pub fn start<I>(
        &self,
        parent: &Context,
        component: &str,
        kind: ComponentKind,
        discriminator: &str,
        tags: I,
    ) -> SpanGuard
    where
        I: IntoIterator<Item = KeyValue>,
    {
        let mut attributes = vec![
            KeyValue::new(COMPONENT_TAG, component.to_string()),
            KeyValue::new(SPAN_KIND_TAG, kind.as_str()),
            KeyValue::new(VERSION_TAG, self.version.to_string()),
        ];
        attributes.extend(tags);

        let builder = self
            .tracer
            .span_builder(operation_name(component, discriminator))
            .with_kind(kind.into())
            .with_attributes(attributes);
        let span = self.tracer.build_with_context(builder, parent);

        SpanGuard {
            cx: parent.with_span(span),
            finished: false,
        }
    }

    /// Inject the trace context of `cx` into the carrier.
    ///
    /// Fails with the first key or value the carrier rejected.
    pub fn inject<C: Carrier + ?Sized>(
        &self,
        cx: &Context,
        carrier: &mut C,
    ) -> Result<(), CarrierError> {
        let mut injector = CheckedInjector::new(carrier);
        match &self.propagator {
            Some(propagator) => propagator.inject_context(cx, &mut injector),
            None => global::get_text_map_propagator(|propagator| {
                propagator.inject_context(cx, &mut injector)
            }),
        }
        injector.finish()
    }

    /// Extract a remote parent context from inbound headers.
    pub fn extract(&self, extractor: &dyn Extractor) -> Context {
        match &self.propagator {
            Some(propagator) => propagator.extract(extractor),
            None => global::get_text_map_propagator(|propagator| propagator.extract(extractor)),
        }
    }
}

impl fmt::Debug for SpanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanFactory")
            .field("propagator", &self.propagator)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A started span, ended exactly once.
///
/// [`SpanGuard::finish`] consumes the guard. A guard dropped without being
/// finished ends its span as failed.
#[must_use = "a span guard ends its span when dropped"]
pub struct SpanGuard {
    cx: Context,
    finished: bool,
}

impl SpanGuard {
    /// Context carrying this span, for injection and child spans.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn finish<E: fmt::Display + ?Sized>(mut self, err: Option<&E>) {
        self.complete(err.map(ToString::to_string));
    }

    fn complete(&mut self, error: Option<String>) {
        let span = self.cx.span();
        span.set_attribute(KeyValue::new(ERROR_TAG, error.is_some()));
        if let Some(message) = error {
            span.set_status(Status::error(message));
        }
        span.end();
        self.finished = true;
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.complete(Some("span dropped before completion".to_string()));
        }
    }
}
