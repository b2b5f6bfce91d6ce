//! Server-side request tracing.
//!
//! [`TraceLayer`] wraps the routes of a [`Component`](crate::Component) and
//! records one consumer span per request served, parented on the trace
//! context the caller sent. The extracted [`Context`], carrying the caller's
//! correlation ID or a fresh one, is placed in the request extensions:
//!
//! ```no_run
//! # fn handle(request: tonic::Request<()>) {
//! use conduit_core::CorrelationContextExt;
//!
//! let cx = request.extensions().get::<opentelemetry::Context>();
//! let correlation_id = cx.and_then(|cx| cx.correlation_id());
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use conduit_core::correlation::{self, CorrelationContextExt};
use conduit_core::{ComponentKind, SpanFactory};
use http::{Request, Response};
use opentelemetry::KeyValue;
use tower::{Layer, Service};

use crate::client::{METHOD_TAG, grpc_status};
use crate::propagation;

pub const COMPONENT: &str = "grpc-server";

/// Traces requests when a span factory is configured, forwards them untouched
/// otherwise.
#[derive(Clone, Debug, Default)]
pub struct TraceLayer {
    spans: Option<SpanFactory>,
}

impl TraceLayer {
    pub fn new(spans: Option<SpanFactory>) -> Self {
        Self { spans }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TracedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracedService {
            inner,
            spans: self.spans.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TracedService<S> {
    inner: S,
    spans: Option<SpanFactory>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TracedService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let Some(spans) = &self.spans else {
            return Box::pin(self.inner.call(request));
        };

        let method = request.uri().path().to_string();
        let parent = propagation::extract_headers(spans, request.headers());
        let parent = match parent.correlation_id() {
            Some(_) => parent,
            None => parent.with_correlation_id(correlation::new_id()),
        };
        let span = spans.start(
            &parent,
            COMPONENT,
            ComponentKind::Consumer,
            &method,
            [KeyValue::new(METHOD_TAG, method.clone())],
        );
        request.extensions_mut().insert(span.context().clone());

        let response = self.inner.call(request);
        Box::pin(async move {
            let result = response.await;
            match &result {
                Ok(response) => match grpc_status(response.headers()) {
                    Some(code) => {
                        tracing::debug!(method = %method, code, "Request failed");
                        let message = format!("grpc-status {code}");
                        span.finish(Some(message.as_str()));
                    }
                    None => span.finish::<str>(None),
                },
                Err(err) => {
                    tracing::warn!(method = %method, error = %err, "Request failed");
                    span.finish(Some(err));
                }
            }
            result
        })
    }
}
