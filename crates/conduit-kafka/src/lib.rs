//! # Conduit Kafka
//!
//! Traced Kafka producers. [`SyncProducer`] resolves each publish with the
//! record's partition and offset; [`AsyncProducer`] returns once the record is
//! queued and reports delivery failures through [`DeliveryErrors`].

pub mod headers;
pub mod producer;

pub use headers::KafkaHeaders;
pub use producer::{
    AsyncProducer, AsyncTransport, Builder, Delivery, DeliveryError, DeliveryErrors, KafkaMessage,
    SendError, SyncProducer, SyncTransport,
};
