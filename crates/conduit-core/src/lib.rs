//! # Conduit Core
//!
//! Trace propagation primitives shared by every conduit transport: the
//! [`Carrier`] abstraction, correlation IDs, the [`SpanFactory`], the generic
//! [`TracedPublisher`] and the [`aggregate`] helper used at teardown.

pub mod carrier;
pub mod correlation;
pub mod error;
pub mod log;
pub mod publisher;
pub mod span;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use carrier::{Carrier, CarrierError};
pub use correlation::{CorrelationContextExt, HEADER_ID};
pub use error::{AggregateError, BoxError, Error, Result, aggregate};
pub use publisher::{TracedPublisher, Transport};
pub use span::{ComponentKind, SpanFactory, SpanGuard};
