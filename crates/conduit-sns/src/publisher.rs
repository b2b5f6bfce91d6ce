use async_trait::async_trait;
use aws_sdk_sns::Client;
use aws_sdk_sns::error::SdkError;
use aws_sdk_sns::operation::publish::PublishError;
use conduit_core::{AggregateError, Carrier, SpanFactory, TracedPublisher, Transport};
use tracing::debug;

use crate::attributes::Attributes;

pub const COMPONENT: &str = "sns-publisher";
pub const TARGET_TAG: &str = "target";

/// A traced SNS publisher.
pub type Publisher = TracedPublisher<SnsTransport>;

#[derive(Debug, Clone, Default)]
pub struct SnsMessage {
    /// Topic or endpoint ARN.
    pub target_arn: String,
    pub message: String,
    pub subject: Option<String>,
    pub attributes: Attributes,
}

impl SnsMessage {
    pub fn new(target_arn: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target_arn: target_arn.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

pub struct SnsTransport {
    client: Client,
}

impl SnsTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for SnsTransport {
    type Message = SnsMessage;
    /// Message ID assigned by SNS.
    type Receipt = String;
    type Error = SdkError<PublishError>;

    fn component(&self) -> &'static str {
        COMPONENT
    }

    fn destination_tag(&self) -> &'static str {
        TARGET_TAG
    }

    fn destination<'m>(&self, message: &'m SnsMessage) -> &'m str {
        &message.target_arn
    }

    fn carrier<'m>(&self, message: &'m mut SnsMessage) -> &'m mut dyn Carrier {
        &mut message.attributes
    }

    async fn send(&self, message: SnsMessage) -> Result<String, SdkError<PublishError>> {
        let attributes = (!message.attributes.is_empty()).then(|| message.attributes.into_inner());
        let output = self
            .client
            .publish()
            .target_arn(message.target_arn)
            .message(message.message)
            .set_subject(message.subject)
            .set_message_attributes(attributes)
            .send()
            .await?;
        Ok(output.message_id().unwrap_or_default().to_string())
    }

    /// The SDK client holds no broker connection; there is nothing to release.
    async fn close(&self) -> Result<(), AggregateError> {
        debug!("SNS transport closed");
        Ok(())
    }
}

/// Wrap an SNS client in a traced publisher.
pub fn new(client: Client, spans: SpanFactory) -> Publisher {
    TracedPublisher::new(SnsTransport::new(client), spans)
}
