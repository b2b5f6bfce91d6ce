//! Trace context and correlation ID propagation over gRPC headers.
//!
//! The header-map functions serve the traced client channel and the server
//! trace layer; the metadata-map ones serve handlers working on
//! `tonic::Request` directly.

use conduit_core::correlation::{self, CorrelationContextExt, HEADER_ID};
use conduit_core::{Carrier, CarrierError, SpanFactory};
use http::HeaderMap;
use opentelemetry::Context;
use opentelemetry::propagation::Extractor;
use tonic::metadata::{KeyRef, MetadataKey, MetadataMap, MetadataValue};

/// Extract the remote parent context from incoming request metadata.
///
/// The correlation ID, when present, is carried on the returned context.
///
/// ```no_run
/// # use conduit_grpc::propagation::extract_context;
/// # fn handle(spans: &conduit_core::SpanFactory, request: tonic::Request<()>) {
/// let parent_cx = extract_context(spans, request.metadata());
/// # }
/// ```
pub fn extract_context(spans: &SpanFactory, metadata: &MetadataMap) -> Context {
    extract(spans, &MetadataExtractor(metadata))
}

/// Extract the remote parent context from raw HTTP/2 request headers.
pub fn extract_headers(spans: &SpanFactory, headers: &HeaderMap) -> Context {
    extract(spans, &HeaderExtractor(headers))
}

fn extract(spans: &SpanFactory, extractor: &dyn Extractor) -> Context {
    let cx = spans.extract(extractor);
    match header_correlation_id(extractor) {
        Some(id) => cx.with_correlation_id(id),
        None => cx,
    }
}

/// Inject the trace context and correlation ID of `cx` into outgoing metadata.
///
/// Fails with the first header the metadata map rejects.
pub fn inject_context(
    spans: &SpanFactory,
    cx: &Context,
    metadata: &mut MetadataMap,
) -> Result<(), CarrierError> {
    inject(spans, cx, &mut MetadataCarrier(metadata))
}

/// Inject the trace context and correlation ID of `cx` into HTTP/2 headers.
pub fn inject_headers(
    spans: &SpanFactory,
    cx: &Context,
    headers: &mut HeaderMap,
) -> Result<(), CarrierError> {
    inject(spans, cx, headers)
}

fn inject<C: Carrier + ?Sized>(
    spans: &SpanFactory,
    cx: &Context,
    carrier: &mut C,
) -> Result<(), CarrierError> {
    spans.inject(cx, carrier)?;
    correlation::stamp(cx, carrier)?;
    Ok(())
}

/// Correlation ID from the request metadata, or a freshly generated one.
pub fn correlation_id(metadata: &MetadataMap) -> String {
    header_correlation_id(&MetadataExtractor(metadata)).unwrap_or_else(correlation::new_id)
}

fn header_correlation_id(extractor: &dyn Extractor) -> Option<String> {
    extractor
        .get(HEADER_ID)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

struct MetadataExtractor<'a>(&'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|key| match key {
                KeyRef::Ascii(k) => Some(k.as_str()),
                KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// ASCII metadata entries as a [`Carrier`].
pub struct MetadataCarrier<'a>(pub &'a mut MetadataMap);

impl Carrier for MetadataCarrier<'_> {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError> {
        let name = MetadataKey::from_bytes(key.as_bytes())
            .map_err(|e| CarrierError::new(key, e.to_string()))?;
        let value =
            MetadataValue::try_from(&value).map_err(|e| CarrierError::new(key, e.to_string()))?;
        self.0.insert(name, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::testing::TestTracer;
    use opentelemetry::propagation::text_map_propagator::FieldIter;
    use opentelemetry::propagation::{Injector, TextMapPropagator};
    use opentelemetry::trace::TraceContextExt;

    use super::*;

    #[derive(Debug)]
    struct BadKeyPropagator;

    impl TextMapPropagator for BadKeyPropagator {
        fn inject_context(&self, _cx: &Context, injector: &mut dyn Injector) {
            injector.set("bad key\n", "value".to_string());
        }

        fn extract_with_context(&self, cx: &Context, _extractor: &dyn Extractor) -> Context {
            cx.clone()
        }

        fn fields(&self) -> FieldIter<'_> {
            FieldIter::new(&[])
        }
    }

    #[test]
    fn test_correlation_id_read_from_metadata() {
        let tracer = TestTracer::new();
        let mut metadata = MetadataMap::new();
        metadata.insert(HEADER_ID, MetadataValue::from_static("corr-1"));
        assert_eq!(correlation_id(&metadata), "corr-1");
        assert_eq!(
            extract_context(&tracer.factory(), &metadata).correlation_id(),
            Some("corr-1")
        );
    }

    #[test]
    fn test_correlation_id_generated_when_missing() {
        let tracer = TestTracer::new();
        let metadata = MetadataMap::new();
        let id = correlation_id(&metadata);
        assert!(!id.is_empty());
        assert_eq!(
            extract_context(&tracer.factory(), &metadata).correlation_id(),
            None
        );
    }

    #[test]
    fn test_inject_then_extract_keeps_trace_and_correlation() {
        let tracer = TestTracer::new();
        let spans = tracer.factory();
        let span = spans.start(
            &Context::new().with_correlation_id("corr-2"),
            "grpc-client",
            conduit_core::ComponentKind::Producer,
            "/svc/Method",
            [],
        );

        let mut metadata = MetadataMap::new();
        inject_context(&spans, span.context(), &mut metadata).unwrap();
        assert_eq!(metadata.get(HEADER_ID).unwrap(), "corr-2");
        assert!(metadata.get("traceparent").is_some());

        let mut headers = HeaderMap::new();
        inject_headers(&spans, span.context(), &mut headers).unwrap();
        let extracted = extract_headers(&spans, &headers);
        assert_eq!(extracted.correlation_id(), Some("corr-2"));
        assert_eq!(
            extracted.span().span_context().trace_id(),
            span.context().span().span_context().trace_id()
        );
        span.finish::<str>(None);
    }

    #[test]
    fn test_inject_fails_on_rejected_header() {
        let tracer = TestTracer::new();
        let spans = tracer.factory().with_propagator(BadKeyPropagator);
        let cx = Context::new().with_correlation_id("c");
        let mut metadata = MetadataMap::new();

        let err = inject_context(&spans, &cx, &mut metadata).unwrap_err();
        assert_eq!(err.key, "bad key\n");
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_extractor_lists_ascii_keys() {
        let mut metadata = MetadataMap::new();
        metadata.insert("traceparent", MetadataValue::from_static("00-x-y-01"));
        metadata.insert_bin("trace-bin", tonic::metadata::MetadataValue::from_bytes(b"raw"));
        let extractor = MetadataExtractor(&metadata);
        assert_eq!(extractor.keys(), vec!["traceparent"]);
        assert_eq!(extractor.get("traceparent"), Some("00-x-y-01"));
    }
}
