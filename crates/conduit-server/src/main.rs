use std::time::Duration;

use anyhow::Context as _;
use conduit_core::SpanFactory;
use conduit_core::log::fatal;
use conduit_core::telemetry::init_telemetry;
use conduit_grpc::{Builder, options};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic_health::ServingStatus;
use tracing::{info, warn};

mod config;

use crate::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new().context("failed to load configuration")?;
    let telemetry = init_telemetry(&settings.telemetry)?;

    let spans = telemetry.span_factory(env!("CARGO_PKG_NAME"));

    if let Err(err) = serve(settings, spans).await {
        let abort = fatal(format!("conduit server failed: {err:#}"));
        drop(telemetry);
        std::process::exit(abort.code());
    }

    info!("Conduit server shut down");
    Ok(())
}

async fn serve(settings: Settings, spans: SpanFactory) -> anyhow::Result<()> {
    let mut server_options = Vec::new();
    if settings.server.timeout_secs > 0 {
        server_options.push(options::timeout(Duration::from_secs(
            settings.server.timeout_secs,
        )));
    }

    let mut component = Builder::new(settings.server.port)
        .with_host(settings.server.host.clone())
        .with_options(server_options)
        .with_spans(spans)
        .create()
        .context("failed to create gRPC component")?;

    let (reporter, health) = tonic_health::server::health_reporter();
    component.server().add_service(health);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping gRPC component");
        reporter
            .set_service_status("", ServingStatus::NotServing)
            .await;
        signal_token.cancel();
    });

    info!(
        host = %settings.server.host,
        port = component.port(),
        service.name = %settings.telemetry.service_name,
        "Starting conduit server"
    );
    component.run(shutdown).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
