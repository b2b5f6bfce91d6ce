//! # Conduit AMQP
//!
//! Publishes to AMQP 0-9-1 exchanges with trace context and correlation ID
//! carried in the message header table. Every publish waits for the broker's
//! confirm.

pub mod headers;
pub mod publisher;

pub use headers::AmqpHeaders;
pub use publisher::{
    AmqpMessage, AmqpTransport, ConnectionOption, PublishError, Publisher, client_property,
    connect, connection_name,
};
