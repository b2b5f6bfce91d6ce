//! One publish algorithm shared by every transport.
//!
//! A [`Transport`] describes how to reach a broker: what a message looks like,
//! where its headers live, and how to send and close. [`TracedPublisher`] wraps
//! any transport and makes sure every message leaves with a trace context and a
//! correlation ID, and that every publish starts and ends exactly one span.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use opentelemetry::{Context, KeyValue};
use tracing::{debug, warn};

use crate::carrier::{Carrier, CarrierError};
use crate::correlation;
use crate::error::{AggregateError, Error, Result};
use crate::span::{ComponentKind, SpanFactory, SpanGuard};

/// Capabilities a transport provides to [`TracedPublisher`].
///
/// Opening the connection is the transport's constructor.
#[async_trait]
pub trait Transport: Send + Sync {
    type Message: Send + 'static;
    type Receipt: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Value of the `component` span tag, e.g. `amqp-publisher`.
    fn component(&self) -> &'static str;

    /// Name of the tag holding the destination: `exchange`, `topic` or `target`.
    fn destination_tag(&self) -> &'static str;

    fn destination<'m>(&self, message: &'m Self::Message) -> &'m str;

    /// Transport-specific tags added to every span.
    fn tags(&self) -> Vec<KeyValue> {
        Vec::new()
    }

    /// The message's native header container.
    fn carrier<'m>(&self, message: &'m mut Self::Message) -> &'m mut dyn Carrier;

    async fn send(&self, message: Self::Message) -> std::result::Result<Self::Receipt, Self::Error>;

    /// Close every owned resource, reporting all failures together.
    async fn close(&self) -> std::result::Result<(), AggregateError>;
}

pub struct TracedPublisher<T> {
    transport: T,
    spans: SpanFactory,
    closed: AtomicBool,
}

impl<T: Transport> TracedPublisher<T> {
    pub fn new(transport: T, spans: SpanFactory) -> Self {
        Self {
            transport,
            spans,
            closed: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn spans(&self) -> &SpanFactory {
        &self.spans
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publish a message with trace context and correlation ID attached.
    ///
    /// Fails with [`Error::Inject`] without sending when the message headers
    /// reject the trace context, and with [`Error::Send`] when the transport
    /// fails. Either way the span is finished as failed.
    pub async fn publish(&self, cx: &Context, mut message: T::Message) -> Result<T::Receipt> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let component = self.transport.component();
        let destination = self.transport.destination(&message).to_string();
        let mut tags = vec![KeyValue::new(
            self.transport.destination_tag(),
            destination.clone(),
        )];
        tags.extend(self.transport.tags());

        let span = self.spans.start(
            cx,
            component,
            ComponentKind::Producer,
            &destination,
            tags,
        );

        let correlation_id = match self.decorate(&span, cx, &mut message) {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    component,
                    destination = %destination,
                    error = %err,
                    "Failed to inject tracing headers"
                );
                span.finish(Some(&err));
                return Err(err.into());
            }
        };

        let result = self.transport.send(message).await;
        span.finish(result.as_ref().err());

        match result {
            Ok(receipt) => {
                debug!(
                    component,
                    destination = %destination,
                    correlation_id = %correlation_id,
                    "Message published"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(
                    component,
                    destination = %destination,
                    correlation_id = %correlation_id,
                    error = %err,
                    "Failed to publish message"
                );
                Err(Error::send(err))
            }
        }
    }

    fn decorate(
        &self,
        span: &SpanGuard,
        cx: &Context,
        message: &mut T::Message,
    ) -> std::result::Result<String, CarrierError> {
        let carrier = self.transport.carrier(message);
        self.spans.inject(span.context(), &mut *carrier)?;
        correlation::stamp(cx, carrier)
    }

    /// Close the underlying transport.
    ///
    /// Later publishes fail with [`Error::Closed`]. Closing again delegates to
    /// the transport once more and returns whatever it reports.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.transport.close().await?;
        debug!(component = self.transport.component(), "Publisher closed");
        Ok(())
    }
}
