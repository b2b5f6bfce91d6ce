//! Error types shared by every conduit transport.

use std::fmt;

use thiserror::Error;

use crate::carrier::CarrierError;

/// Boxed error used to carry transport-specific causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to open connection: {0}")]
    Connection(#[source] BoxError),

    #[error("failed to inject tracing headers: {0}")]
    Inject(#[from] CarrierError),

    #[error("failed to publish message: {0}")]
    Send(#[source] BoxError),

    #[error("publisher is closed")]
    Closed,

    #[error(transparent)]
    Shutdown(#[from] AggregateError),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connection(err: impl Into<BoxError>) -> Self {
        Self::Connection(err.into())
    }

    pub fn send(err: impl Into<BoxError>) -> Self {
        Self::Send(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One or more failures collected from independent close or shutdown operations.
///
/// With a single cause the error displays exactly as that cause and exposes it
/// through `source()`. With several causes the message lists each one followed
/// by a newline.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<BoxError>,
}

impl AggregateError {
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<BoxError> {
        self.errors
    }
}

impl FromIterator<BoxError> for AggregateError {
    fn from_iter<I: IntoIterator<Item = BoxError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.errors.as_slice() {
            return write!(f, "{single}");
        }
        for err in &self.errors {
            writeln!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.errors.as_slice() {
            [single] => Some(single.as_ref()),
            _ => None,
        }
    }
}

/// Collect every failure from a set of already-evaluated operations.
///
/// Arguments are evaluated before the call, so a failing first operation never
/// prevents the later ones from running.
///
/// ```
/// use conduit_core::aggregate;
///
/// let closed: Result<(), std::io::Error> = Ok(());
/// assert!(aggregate([closed]).is_ok());
/// ```
pub fn aggregate<I, E>(results: I) -> std::result::Result<(), AggregateError>
where
    I: IntoIterator<Item = std::result::Result<(), E>>,
    E: Into<BoxError>,
{
    let errors: Vec<BoxError> = results
        .into_iter()
        .filter_map(|result| result.err().map(Into::into))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AggregateError { errors })
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::io;

    use super::*;

    fn fail(message: &str) -> std::result::Result<(), io::Error> {
        Err(io::Error::other(message.to_string()))
    }

    #[test]
    fn test_aggregate_all_ok() {
        let results: Vec<std::result::Result<(), io::Error>> = vec![Ok(()), Ok(()), Ok(())];
        assert!(aggregate(results).is_ok());
    }

    #[test]
    fn test_aggregate_empty() {
        let results: Vec<std::result::Result<(), io::Error>> = Vec::new();
        assert!(aggregate(results).is_ok());
    }

    #[test]
    fn test_aggregate_single_failure_is_transparent() {
        let err = aggregate([Ok(()), fail("channel close failed"), Ok(())]).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.to_string(), "channel close failed");
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("channel close failed")
        );
    }

    #[test]
    fn test_aggregate_multiple_failures_keeps_every_cause() {
        let err = aggregate([fail("channel close failed"), Ok(()), fail("connection reset")])
            .unwrap_err();
        assert_eq!(err.len(), 2);
        let message = err.to_string();
        assert!(message.contains("channel close failed"));
        assert!(message.contains("connection reset"));
        assert_eq!(message, "channel close failed\nconnection reset\n");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_aggregate_does_not_short_circuit() {
        let mut calls = Vec::new();
        let mut close = |name: &'static str, ok: bool| {
            calls.push(name);
            if ok { Ok(()) } else { fail(name) }
        };

        let result = aggregate([close("channel", false), close("connection", true)]);
        assert!(result.is_err());
        assert_eq!(calls, vec!["channel", "connection"]);
    }

    #[test]
    fn test_error_display() {
        let err = Error::config("url is required");
        assert_eq!(err.to_string(), "configuration error: url is required");

        let err = Error::Closed;
        assert_eq!(err.to_string(), "publisher is closed");

        let err = Error::send(io::Error::other("broker unavailable"));
        assert_eq!(
            err.to_string(),
            "failed to publish message: broker unavailable"
        );
        assert!(err.source().is_some());

        let err = Error::from(aggregate([fail("a"), fail("b")]).unwrap_err());
        assert_eq!(err.to_string(), "a\nb\n");
    }
}
