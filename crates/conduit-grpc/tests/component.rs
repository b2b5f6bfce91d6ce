use std::time::Duration;

use conduit_core::testing::{TestTracer, span_tags};
use conduit_grpc::{Builder, ConfigError, client, options};
use opentelemetry::Value;
use opentelemetry::trace::SpanKind;
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;

#[tokio::test]
async fn serves_until_cancelled_then_releases_port() -> anyhow::Result<()> {
    let mut component = Builder::new(60_000)
        .with_host("127.0.0.1")
        .with_options([
            options::timeout(Duration::from_secs(5)),
            options::concurrency_limit_per_connection(32),
            options::http2_keepalive_interval(Duration::from_secs(30)),
        ])
        .create()?;
    let (_reporter, health) = tonic_health::server::health_reporter();
    component.server().add_service(health);
    let url = format!("http://{}", component.local_addr());

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(component.run(shutdown.clone()));

    {
        let mut client = HealthClient::new(Endpoint::new(url.clone())?.connect().await?);
        let response = client
            .check(HealthCheckRequest {
                service: String::new(),
            })
            .await?;
        assert_eq!(response.into_inner().status, ServingStatus::Serving as i32);
    }

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await??;
    assert!(result.is_ok());

    let reconnect = Endpoint::from_shared(url)?
        .connect_timeout(Duration::from_secs(1))
        .connect()
        .await;
    assert!(reconnect.is_err());
    Ok(())
}

#[tokio::test]
async fn traced_request_is_child_of_client_span() -> anyhow::Result<()> {
    let tracer = TestTracer::new();
    let mut component = Builder::new(60_005)
        .with_host("127.0.0.1")
        .with_spans(tracer.factory())
        .create()?;
    let (_reporter, health) = tonic_health::server::health_reporter();
    component.server().add_service(health);
    let url = format!("http://{}", component.local_addr());

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(component.run(shutdown.clone()));

    {
        let channel = client::dial(url, tracer.factory()).await?;
        let mut health = HealthClient::new(channel);
        health
            .check(HealthCheckRequest {
                service: String::new(),
            })
            .await?;
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await???;

    let spans = tracer.finished_spans();
    assert_eq!(spans.len(), 2);
    let consumers: Vec<_> = spans
        .iter()
        .filter(|span| span.span_kind == SpanKind::Consumer)
        .collect();
    assert_eq!(consumers.len(), 1);
    let server = consumers[0];
    let client = spans
        .iter()
        .find(|span| span.span_kind == SpanKind::Producer)
        .ok_or_else(|| anyhow::anyhow!("client span missing"))?;

    assert_eq!(server.name, "grpc-server /grpc.health.v1.Health/Check");
    assert_eq!(
        server.span_context.trace_id(),
        client.span_context.trace_id()
    );
    assert_eq!(server.parent_span_id, client.span_context.span_id());

    let tags = span_tags(server);
    assert_eq!(tags["component"], Value::from("grpc-server"));
    assert_eq!(tags["span.kind"], Value::from("consumer"));
    assert_eq!(tags["error"], Value::Bool(false));
    Ok(())
}

#[tokio::test]
async fn run_returns_immediately_when_already_cancelled() -> anyhow::Result<()> {
    let component = Builder::new(60_001).with_host("127.0.0.1").create()?;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), component.run(shutdown)).await?;
    assert!(result.is_ok());
    Ok(())
}

#[tokio::test]
async fn port_is_released_after_run() -> anyhow::Result<()> {
    let component = Builder::new(60_002).with_host("127.0.0.1").create()?;
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    component.run(shutdown).await?;

    let again = Builder::new(60_002).with_host("127.0.0.1").create();
    assert!(again.is_ok());
    Ok(())
}

#[tokio::test]
async fn busy_port_fails_at_create() -> anyhow::Result<()> {
    let _first = Builder::new(60_003).with_host("127.0.0.1").create()?;
    let second = Builder::new(60_003).with_host("127.0.0.1").create();
    assert!(matches!(second, Err(ConfigError::Bind { .. })));
    Ok(())
}

#[test]
fn invalid_configuration_never_binds() {
    let err = Builder::new(-1).create().err().unwrap();
    assert_eq!(err.to_string(), "port is invalid: -1");

    let err = Builder::new(60_004)
        .with_options([options::max_frame_size(1)])
        .create()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ConfigError::InvalidOption {
            option: "max_frame_size",
            ..
        }
    ));
}
