//! Write views over transport header containers.

use std::collections::HashMap;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::Injector;
use thiserror::Error;

/// A header container that rejected a key or value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("carrier rejected header {key:?}: {reason}")]
pub struct CarrierError {
    pub key: String,
    pub reason: String,
}

impl CarrierError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Flat string-keyed view over a message's native headers.
pub trait Carrier {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError>;
}

impl<C: Carrier + ?Sized> Carrier for &mut C {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError> {
        (**self).set(key, value)
    }
}

impl Carrier for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError> {
        self.insert(key.to_string(), value);
        Ok(())
    }
}

/// HTTP/2 headers, as carried by gRPC requests.
impl Carrier for HeaderMap {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| CarrierError::new(key, e.to_string()))?;
        let value =
            HeaderValue::try_from(value).map_err(|e| CarrierError::new(key, e.to_string()))?;
        self.insert(name, value);
        Ok(())
    }
}

/// Adapts a [`Carrier`] to the propagator's infallible `Injector`, keeping the
/// first rejection so the caller can fail the operation afterwards.
pub(crate) struct CheckedInjector<'a, C: ?Sized> {
    carrier: &'a mut C,
    failure: Option<CarrierError>,
}

impl<'a, C: Carrier + ?Sized> CheckedInjector<'a, C> {
    pub(crate) fn new(carrier: &'a mut C) -> Self {
        Self {
            carrier,
            failure: None,
        }
    }

    pub(crate) fn finish(self) -> Result<(), CarrierError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<C: Carrier + ?Sized> Injector for CheckedInjector<'_, C> {
    fn set(&mut self, key: &str, value: String) {
        if self.failure.is_some() {
            return;
        }
        if let Err(err) = self.carrier.set(key, value) {
            tracing::debug!(key, error = %err, "Carrier rejected trace header");
            self.failure = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_carrier_sets_valid_header() {
        let mut headers = HeaderMap::new();
        headers
            .set("traceparent", "00-abc-def-01".to_string())
            .unwrap();
        assert_eq!(headers.get("traceparent").unwrap(), "00-abc-def-01");
    }

    #[test]
    fn test_header_carrier_rejects_invalid_name() {
        let mut headers = HeaderMap::new();
        let err = headers
            .set("bad key\n", "value".to_string())
            .unwrap_err();
        assert_eq!(err.key, "bad key\n");
        assert!(headers.is_empty());
    }

    #[test]
    fn test_header_carrier_rejects_invalid_value() {
        let mut headers = HeaderMap::new();
        let result = headers.set("x-test", "line\nbreak".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_checked_injector_keeps_first_failure() {
        let mut headers = HeaderMap::new();
        let mut injector = CheckedInjector::new(&mut headers);
        Injector::set(&mut injector, "first key", "1".to_string());
        Injector::set(&mut injector, "second key", "2".to_string());
        let err = injector.finish().unwrap_err();
        assert_eq!(err.key, "first key");
    }

    #[test]
    fn test_checked_injector_passes_through() {
        let mut map: HashMap<String, String> = HashMap::new();
        let mut injector = CheckedInjector::new(&mut map);
        Injector::set(&mut injector, "tracestate", "k=v".to_string());
        assert!(injector.finish().is_ok());
        assert_eq!(map.get("tracestate").map(String::as_str), Some("k=v"));
    }
}
