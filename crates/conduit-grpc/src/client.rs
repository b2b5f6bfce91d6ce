//! A tonic channel that traces every outgoing call.
//!
//! [`TracedChannel`] is a `tower::Service` over [`Channel`], so any generated
//! client accepts it in place of a plain channel:
//!
//! ```no_run
//! # async fn connect(spans: conduit_core::SpanFactory) -> Result<(), tonic::transport::Error> {
//! let channel = conduit_grpc::client::dial("http://127.0.0.1:50051", spans).await?;
//! // let client = HealthClient::new(channel);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use conduit_core::{BoxError, ComponentKind, SpanFactory};
use http::{HeaderMap, Request, Response};
use opentelemetry::{Context, KeyValue};
use tonic::body::Body;
use tonic::transport::{Channel, Endpoint};
use tower::Service;

use crate::propagation;

pub const COMPONENT: &str = "grpc-client";
pub const METHOD_TAG: &str = "method";

const GRPC_STATUS: &str = "grpc-status";

/// Connect to `target`, e.g. `http://127.0.0.1:50051`.
pub async fn dial(
    target: impl Into<String>,
    spans: SpanFactory,
) -> Result<TracedChannel, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(target.into())?;
    dial_with(endpoint, spans).await
}

/// Connect using a fully configured endpoint.
pub async fn dial_with(
    endpoint: Endpoint,
    spans: SpanFactory,
) -> Result<TracedChannel, tonic::transport::Error> {
    let channel = endpoint.connect().await?;
    Ok(TracedChannel::new(channel, spans))
}

#[derive(Clone, Debug)]
pub struct TracedChannel {
    inner: Channel,
    spans: SpanFactory,
}

impl TracedChannel {
    pub fn new(inner: Channel, spans: SpanFactory) -> Self {
        Self { inner, spans }
    }

    pub fn into_inner(self) -> Channel {
        self.inner
    }
}

impl Service<Request<Body>> for TracedChannel {
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let method = request.uri().path().to_string();
        let parent = Context::current();
        let span = self.spans.start(
            &parent,
            COMPONENT,
            ComponentKind::Producer,
            &method,
            [KeyValue::new(METHOD_TAG, method.clone())],
        );

        if let Err(err) =
            propagation::inject_headers(&self.spans, span.context(), request.headers_mut())
        {
            tracing::warn!(method = %method, error = %err, "Failed to inject tracing headers");
            span.finish(Some(&err));
            return Box::pin(async move { Err(err.into()) });
        }

        let response = self.inner.call(request);
        Box::pin(async move {
            match response.await {
                Ok(response) => {
                    match grpc_status(response.headers()) {
                        Some(code) => {
                            let message = format!("grpc-status {code}");
                            span.finish(Some(message.as_str()));
                        }
                        None => span.finish::<str>(None),
                    }
                    Ok(response)
                }
                Err(err) => {
                    span.finish(Some(&err));
                    Err(err.into())
                }
            }
        })
    }
}

/// Non-zero `grpc-status` sent in the response headers.
///
/// Statuses delivered in trailers are not visible here.
pub(crate) fn grpc_status(headers: &HeaderMap) -> Option<i32> {
    headers
        .get(GRPC_STATUS)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|code| *code != 0)
}
