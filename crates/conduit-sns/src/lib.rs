//! # Conduit SNS
//!
//! Publishes to AWS SNS with trace context and correlation ID carried as
//! `String` message attributes.

pub mod attributes;
pub mod publisher;

pub use attributes::{Attributes, MAX_ATTRIBUTES};
pub use publisher::{Publisher, SnsMessage, SnsTransport, new};
