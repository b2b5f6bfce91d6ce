//! Correlation identifiers carried across service boundaries.

use opentelemetry::Context;
use uuid::Uuid;

use crate::carrier::{Carrier, CarrierError};

/// Header key every outbound message carries its correlation ID under.
pub const HEADER_ID: &str = "x-correlation-id";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CorrelationId(String);

/// Reads and attaches correlation IDs on an OpenTelemetry [`Context`].
pub trait CorrelationContextExt {
    fn with_correlation_id(&self, id: impl Into<String>) -> Context;

    fn correlation_id(&self) -> Option<&str>;
}

impl CorrelationContextExt for Context {
    fn with_correlation_id(&self, id: impl Into<String>) -> Context {
        self.with_value(CorrelationId(id.into()))
    }

    fn correlation_id(&self) -> Option<&str> {
        self.get::<CorrelationId>().map(|id| id.0.as_str())
    }
}

/// Generate a fresh correlation ID.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Correlation ID of the context, or a freshly generated one.
pub fn id_from_context(cx: &Context) -> String {
    cx.correlation_id()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_id)
}

/// Write the context's correlation ID into the carrier, returning the value written.
pub fn stamp<C: Carrier + ?Sized>(cx: &Context, carrier: &mut C) -> Result<String, CarrierError> {
    let id = id_from_context(cx);
    carrier.set(HEADER_ID, id.clone())?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_id_from_context_uses_existing_value() {
        let cx = Context::new().with_correlation_id("req-42");
        assert_eq!(cx.correlation_id(), Some("req-42"));
        assert_eq!(id_from_context(&cx), "req-42");
    }

    #[test]
    fn test_id_from_context_generates_uuid() {
        let cx = Context::new();
        assert_eq!(cx.correlation_id(), None);
        let id = id_from_context(&cx);
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, id_from_context(&cx));
    }

    #[test]
    fn test_empty_id_is_replaced() {
        let cx = Context::new().with_correlation_id("");
        let id = id_from_context(&cx);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_stamp_writes_header() {
        let cx = Context::new().with_correlation_id("abc");
        let mut headers: HashMap<String, String> = HashMap::new();
        let written = stamp(&cx, &mut headers).unwrap();
        assert_eq!(written, "abc");
        assert_eq!(headers.get(HEADER_ID).map(String::as_str), Some("abc"));
        assert_eq!(headers.len(), 1);
    }
}
