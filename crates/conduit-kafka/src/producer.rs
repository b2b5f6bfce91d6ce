//! Synchronous and asynchronous Kafka producers.
//!
//! Both run on a [`ThreadedProducer`], whose background thread polls for
//! delivery reports. The synchronous producer waits for its record's report;
//! the asynchronous one returns once the record is queued and reports
//! delivery failures on a side channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    AggregateError, Carrier, Error, HEADER_ID, SpanFactory, TracedPublisher, Transport, aggregate,
};
use opentelemetry::KeyValue;
use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Headers, Message};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::{IntoOpaque, Timeout};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::headers::KafkaHeaders;

pub const SYNC_COMPONENT: &str = "kafka-sync-producer";
pub const ASYNC_COMPONENT: &str = "kafka-async-producer";
pub const TOPIC_TAG: &str = "topic";
pub const TYPE_TAG: &str = "type";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ERROR_CAPACITY: usize = 1024;

pub type SyncProducer = TracedPublisher<SyncTransport>;
pub type AsyncProducer = TracedPublisher<AsyncTransport>;

#[derive(Debug, Clone, Default)]
pub struct KafkaMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: KafkaHeaders,
}

impl KafkaMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Where a record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("failed to enqueue record: {0}")]
    Enqueue(#[source] KafkaError),

    #[error("delivery failed: {0}")]
    Delivery(#[source] KafkaError),

    #[error("delivery report was dropped before completion")]
    Canceled,
}

/// A record the asynchronous producer failed to deliver.
#[derive(Debug, Clone)]
pub struct DeliveryError {
    pub topic: String,
    pub partition: i32,
    pub correlation_id: Option<String>,
    pub error: KafkaError,
}

/// Delivery failures of an [`AsyncProducer`].
///
/// The channel is bounded. Failures reported while it is full are logged and
/// counted in [`DeliveryErrors::dropped`], then discarded. The channel closes
/// once the producer is dropped.
pub struct DeliveryErrors {
    rx: mpsc::Receiver<DeliveryError>,
    dropped: Arc<AtomicU64>,
}

impl DeliveryErrors {
    pub async fn recv(&mut self) -> Option<DeliveryError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DeliveryError> {
        self.rx.try_recv().ok()
    }

    /// Failures discarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn delivery_errors(capacity: usize) -> (AsyncContext, DeliveryErrors) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let context = AsyncContext {
        errors: tx,
        dropped: dropped.clone(),
    };
    (context, DeliveryErrors { rx, dropped })
}

pub struct Builder {
    brokers: Vec<String>,
    config: ClientConfig,
    timeout: Duration,
    error_capacity: usize,
}

impl Builder {
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            config: ClientConfig::new(),
            timeout: DEFAULT_TIMEOUT,
            error_capacity: DEFAULT_ERROR_CAPACITY,
        }
    }

    /// Set a raw librdkafka property.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.set(key, value);
        self
    }

    /// Upper bound for delivery of one record, and for the flush on close.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How many undrained delivery failures the async producer keeps.
    pub fn with_error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity;
        self
    }

    fn client_config(&self) -> Result<ClientConfig, Error> {
        let brokers: Vec<&str> = self
            .brokers
            .iter()
            .map(|broker| broker.trim())
            .filter(|broker| !broker.is_empty())
            .collect();
        if brokers.is_empty() {
            return Err(Error::config("at least one broker is required"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be positive"));
        }

        let mut config = self.config.clone();
        config
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", self.timeout.as_millis().to_string());
        Ok(config)
    }

    /// Build a producer that waits for each record's delivery report.
    pub fn create(self, spans: SpanFactory) -> Result<SyncProducer, Error> {
        let producer: ThreadedProducer<SyncContext> = self
            .client_config()?
            .create_with_context(SyncContext)
            .map_err(Error::connection)?;
        info!(brokers = ?self.brokers, "Kafka sync producer created");
        let transport = SyncTransport {
            producer,
            timeout: self.timeout,
        };
        Ok(TracedPublisher::new(transport, spans))
    }

    /// Build a producer that returns once a record is queued.
    pub fn create_async(
        self,
        spans: SpanFactory,
    ) -> Result<(AsyncProducer, DeliveryErrors), Error> {
        if self.error_capacity == 0 {
            return Err(Error::config("error capacity must be positive"));
        }
        let (context, errors) = delivery_errors(self.error_capacity);
        let producer: ThreadedProducer<AsyncContext> = self
            .client_config()?
            .create_with_context(context)
            .map_err(Error::connection)?;
        info!(brokers = ?self.brokers, "Kafka async producer created");
        let transport = AsyncTransport {
            producer,
            timeout: self.timeout,
        };
        Ok((TracedPublisher::new(transport, spans), errors))
    }
}

type DeliveryReport = Result<Delivery, KafkaError>;

pub struct SyncContext;

impl ClientContext for SyncContext {}

impl ProducerContext for SyncContext {
    type DeliveryOpaque = Box<oneshot::Sender<DeliveryReport>>;

    fn delivery(&self, result: &DeliveryResult<'_>, report: Self::DeliveryOpaque) {
        let outcome = match result {
            Ok(message) => Ok(Delivery {
                partition: message.partition(),
                offset: message.offset(),
            }),
            Err((err, _)) => Err(err.clone()),
        };
        // The publisher may have given up waiting.
        let _ = report.send(outcome);
    }
}

pub struct AsyncContext {
    errors: mpsc::Sender<DeliveryError>,
    dropped: Arc<AtomicU64>,
}

impl AsyncContext {
    fn report(&self, failure: DeliveryError) {
        match self.errors.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(failure)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    topic = %failure.topic,
                    correlation_id = failure.correlation_id.as_deref().unwrap_or_default(),
                    dropped,
                    "Delivery error channel full, discarding failure"
                );
            }
            // Nobody is listening.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl ClientContext for AsyncContext {}

impl ProducerContext for AsyncContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        if let Err((err, message)) = result {
            let correlation_id = message.headers().and_then(|headers| {
                headers
                    .iter()
                    .find(|header| header.key == HEADER_ID)
                    .and_then(|header| header.value)
                    .map(|value| String::from_utf8_lossy(value).into_owned())
            });
            warn!(
                topic = message.topic(),
                correlation_id = correlation_id.as_deref().unwrap_or_default(),
                error = %err,
                "Kafka delivery failed"
            );
            self.report(DeliveryError {
                topic: message.topic().to_string(),
                partition: message.partition(),
                correlation_id,
                error: err.clone(),
            });
        }
    }
}

fn record<'a, O: IntoOpaque>(
    message: &'a KafkaMessage,
    opaque: O,
) -> BaseRecord<'a, [u8], [u8], O> {
    let mut record = BaseRecord::with_opaque_to(&message.topic, opaque)
        .payload(message.payload.as_slice())
        .headers(message.headers.to_owned_headers());
    if let Some(key) = &message.key {
        record = record.key(key.as_slice());
    }
    record
}

fn flush<C: ProducerContext + 'static>(
    producer: &ThreadedProducer<C>,
    timeout: Duration,
) -> Result<(), AggregateError> {
    let flushed = producer.flush(Timeout::After(timeout));
    debug!(ok = flushed.is_ok(), "Kafka producer flushed");
    aggregate([flushed])
}

fn active_brokers<C: ProducerContext + 'static>(
    producer: &ThreadedProducer<C>,
    timeout: Duration,
) -> Result<Vec<String>, KafkaError> {
    let metadata = producer
        .client()
        .fetch_metadata(None, Timeout::After(timeout))?;
    Ok(metadata
        .brokers()
        .iter()
        .map(|broker| format!("{}:{}", broker.host(), broker.port()))
        .collect())
}

pub struct SyncTransport {
    producer: ThreadedProducer<SyncContext>,
    timeout: Duration,
}

impl SyncTransport {
    /// Brokers currently reported by the cluster metadata. Blocks the caller.
    pub fn active_brokers(&self) -> Result<Vec<String>, KafkaError> {
        active_brokers(&self.producer, self.timeout)
    }
}

#[async_trait]
impl Transport for SyncTransport {
    type Message = KafkaMessage;
    type Receipt = Delivery;
    type Error = SendError;

    fn component(&self) -> &'static str {
        SYNC_COMPONENT
    }

    fn destination_tag(&self) -> &'static str {
        TOPIC_TAG
    }

    fn destination<'m>(&self, message: &'m KafkaMessage) -> &'m str {
        &message.topic
    }

    fn tags(&self) -> Vec<KeyValue> {
        vec![KeyValue::new(TYPE_TAG, "sync")]
    }

    fn carrier<'m>(&self, message: &'m mut KafkaMessage) -> &'m mut dyn Carrier {
        &mut message.headers
    }

    async fn send(&self, message: KafkaMessage) -> Result<Delivery, SendError> {
        let (tx, rx) = oneshot::channel();
        self.producer
            .send(record(&message, Box::new(tx)))
            .map_err(|(err, _)| SendError::Enqueue(err))?;

        match rx.await {
            Ok(report) => report.map_err(SendError::Delivery),
            Err(_) => Err(SendError::Canceled),
        }
    }

    async fn close(&self) -> Result<(), AggregateError> {
        flush(&self.producer, self.timeout)
    }
}

pub struct AsyncTransport {
    producer: ThreadedProducer<AsyncContext>,
    timeout: Duration,
}

impl AsyncTransport {
    /// Brokers currently reported by the cluster metadata. Blocks the caller.
    pub fn active_brokers(&self) -> Result<Vec<String>, KafkaError> {
        active_brokers(&self.producer, self.timeout)
    }
}

#[async_trait]
impl Transport for AsyncTransport {
    type Message = KafkaMessage;
    type Receipt = ();
    type Error = SendError;

    fn component(&self) -> &'static str {
        ASYNC_COMPONENT
    }

    fn destination_tag(&self) -> &'static str {
        TOPIC_TAG
    }

    fn destination<'m>(&self, message: &'m KafkaMessage) -> &'m str {
        &message.topic
    }

    fn tags(&self) -> Vec<KeyValue> {
        vec![KeyValue::new(TYPE_TAG, "async")]
    }

    fn carrier<'m>(&self, message: &'m mut KafkaMessage) -> &'m mut dyn Carrier {
        &mut message.headers
    }

    async fn send(&self, message: KafkaMessage) -> Result<(), SendError> {
        self.producer
            .send(record(&message, ()))
            .map_err(|(err, _)| SendError::Enqueue(err))
    }

    async fn close(&self) -> Result<(), AggregateError> {
        flush(&self.producer, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::testing::TestTracer;
    use rdkafka::error::RDKafkaErrorCode;

    use super::*;

    #[test]
    fn test_brokers_required() {
        let tracer = TestTracer::new();
        let err = Builder::new(Vec::<String>::new())
            .create(tracer.factory())
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "configuration error: at least one broker is required"
        );

        let err = Builder::new(["  "]).create(tracer.factory()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let tracer = TestTracer::new();
        let result = Builder::new(["localhost:9092"])
            .with_timeout(Duration::ZERO)
            .create(tracer.factory());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_error_capacity_rejected() {
        let tracer = TestTracer::new();
        let result = Builder::new(["localhost:9092"])
            .with_error_capacity(0)
            .create_async(tracer.factory());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_full_error_channel_counts_dropped_failures() {
        let (context, mut errors) = delivery_errors(1);
        let failure = |id: &str| DeliveryError {
            topic: "orders".to_string(),
            partition: 0,
            correlation_id: Some(id.to_string()),
            error: KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
        };

        context.report(failure("first"));
        context.report(failure("second"));
        context.report(failure("third"));
        assert_eq!(errors.dropped(), 2);

        let kept = errors.try_recv().unwrap();
        assert_eq!(kept.correlation_id.as_deref(), Some("first"));
        assert!(errors.try_recv().is_none());

        context.report(failure("fourth"));
        assert_eq!(errors.try_recv().unwrap().correlation_id.as_deref(), Some("fourth"));
        assert_eq!(errors.dropped(), 2);
    }

    #[test]
    fn test_client_config() {
        let builder = Builder::new(["broker-1:9092", "broker-2:9092"])
            .with_config("client.id", "orders")
            .with_timeout(Duration::from_secs(2));
        let config = builder.client_config().unwrap();
        assert_eq!(
            config.get("bootstrap.servers"),
            Some("broker-1:9092,broker-2:9092")
        );
        assert_eq!(config.get("message.timeout.ms"), Some("2000"));
        assert_eq!(config.get("client.id"), Some("orders"));
    }

    #[test]
    fn test_record_carries_key_and_headers() {
        let mut message = KafkaMessage::new("orders", b"payload".to_vec()).with_key("k1");
        message
            .headers
            .set("x-correlation-id", "abc".to_string())
            .unwrap();
        let record = record(&message, ());
        assert_eq!(record.topic, "orders");
        assert_eq!(record.key, Some(&b"k1"[..]));
        assert_eq!(record.payload, Some(&b"payload"[..]));
        assert!(record.headers.is_some());
    }
}
