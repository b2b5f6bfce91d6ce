//! A gRPC server with a managed lifecycle.
//!
//! [`Builder`] validates everything and binds the socket; [`Component`] owns the
//! bound listener and the routes registered on it; [`Component::run`] serves
//! until its cancellation token fires.

use std::net::{IpAddr, SocketAddr, TcpListener as StdTcpListener};

use conduit_core::SpanFactory;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use crate::error::{ComponentError, ConfigError};
use crate::options::{ServerConfig, ServerOption};
use crate::trace::TraceLayer;

const DEFAULT_HOST: &str = "0.0.0.0";

pub struct Builder {
    host: String,
    port: i32,
    options: Vec<ServerOption>,
    spans: Option<SpanFactory>,
}

impl Builder {
    /// Start configuring a component listening on `port`.
    ///
    /// The port is validated by [`Builder::create`], not here.
    pub fn new(port: i32) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            options: Vec::new(),
            spans: None,
        }
    }

    /// IP address to bind. Defaults to all interfaces.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = ServerOption>) -> Self {
        self.options.extend(options);
        self
    }

    /// Record a consumer span for every request served.
    pub fn with_spans(mut self, spans: SpanFactory) -> Self {
        self.spans = Some(spans);
        self
    }

    /// Validate the configuration and bind the listening socket.
    ///
    /// The returned component does not accept connections until it is run.
    pub fn create(self) -> Result<Component, ConfigError> {
        let port = u16::try_from(self.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or(ConfigError::InvalidPort(self.port))?;
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost {
                host: self.host.clone(),
                source,
            })?;

        let config = self
            .options
            .into_iter()
            .try_fold(ServerConfig::default(), |cfg, option| option(cfg))?;

        let addr = SocketAddr::new(ip, port);
        let listener = bind(addr)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ConfigError::Bind { addr, source })?;

        debug!(
            addr = %local_addr,
            ?config,
            traced = self.spans.is_some(),
            "gRPC component created"
        );

        Ok(Component {
            listener,
            local_addr,
            config,
            routes: RoutesBuilder::default(),
            spans: self.spans,
        })
    }
}

fn bind(addr: SocketAddr) -> Result<StdTcpListener, ConfigError> {
    let listener = StdTcpListener::bind(addr).map_err(|source| ConfigError::Bind { addr, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| ConfigError::Bind { addr, source })?;
    Ok(listener)
}

pub struct Component {
    listener: StdTcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    routes: RoutesBuilder,
    spans: Option<SpanFactory>,
}

impl Component {
    /// Routing surface for registering services before [`Component::run`].
    pub fn server(&mut self) -> &mut RoutesBuilder {
        &mut self.routes
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve registered services until `shutdown` is cancelled.
    ///
    /// Returns `Ok(())` after a graceful stop; the listener is released before
    /// this returns.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ComponentError> {
        let Component {
            listener,
            local_addr,
            config,
            routes,
            spans,
        } = self;

        let listener = TcpListener::from_std(listener).map_err(ComponentError::Listener)?;
        let incoming = TcpListenerStream::new(listener);

        info!(addr = %local_addr, "gRPC component listening");

        let result = config
            .apply(Server::builder())
            .layer(TraceLayer::new(spans))
            .add_routes(routes.routes())
            .serve_with_incoming_shutdown(incoming, shutdown.cancelled())
            .await;

        match result {
            Ok(()) => {
                info!(addr = %local_addr, "gRPC component stopped");
                Ok(())
            }
            Err(e) => {
                warn!(addr = %local_addr, error = %e, "gRPC component stopped with error");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::options;

    #[test]
    fn test_invalid_port_rejected() {
        let err = Builder::new(-1).create().err().unwrap();
        assert_eq!(err.to_string(), "port is invalid: -1");

        assert!(matches!(
            Builder::new(0).create(),
            Err(ConfigError::InvalidPort(0))
        ));
        assert!(matches!(
            Builder::new(65_536).create(),
            Err(ConfigError::InvalidPort(65_536))
        ));
    }

    #[test]
    fn test_invalid_host_rejected() {
        let result = Builder::new(60_100).with_host("not-an-ip").create();
        assert!(matches!(result, Err(ConfigError::InvalidHost { .. })));
    }

    #[test]
    fn test_option_failure_aborts_create() {
        let result = Builder::new(60_101)
            .with_host("127.0.0.1")
            .with_options([
                options::timeout(Duration::from_secs(1)),
                options::timeout(Duration::from_secs(2)),
            ])
            .create();
        assert!(matches!(result, Err(ConfigError::Conflict("timeout"))));
    }

    #[test]
    fn test_create_binds_port() {
        let component = Builder::new(60_102)
            .with_host("127.0.0.1")
            .with_options([options::max_concurrent_streams(64)])
            .create()
            .unwrap();
        assert_eq!(component.port(), 60_102);
        assert_eq!(component.config().max_concurrent_streams, Some(64));

        let busy = Builder::new(60_102).with_host("127.0.0.1").create();
        assert!(matches!(busy, Err(ConfigError::Bind { .. })));
    }
}
