//! Server options applied between `Builder::new` and `Builder::create`.
//!
//! Each option is a function from one [`ServerConfig`] to the next. Options
//! run in the order given; the first failure aborts creation.

use std::time::Duration;

use tonic::transport::Server;

use crate::error::ConfigError;

/// HTTP/2 bounds for SETTINGS_MAX_FRAME_SIZE.
const MIN_FRAME_SIZE: u32 = 16_384;
const MAX_FRAME_SIZE: u32 = 16_777_215;
const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

pub type ServerOption = Box<dyn FnOnce(ServerConfig) -> Result<ServerConfig, ConfigError> + Send>;

/// Transport settings collected from options. Unset fields keep tonic's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub timeout: Option<Duration>,
    pub concurrency_limit_per_connection: Option<usize>,
    pub max_concurrent_streams: Option<u32>,
    pub http2_keepalive_interval: Option<Duration>,
    pub initial_stream_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
}

impl ServerConfig {
    pub(crate) fn apply(&self, mut server: Server) -> Server {
        if let Some(timeout) = self.timeout {
            server = server.timeout(timeout);
        }
        if let Some(limit) = self.concurrency_limit_per_connection {
            server = server.concurrency_limit_per_connection(limit);
        }
        if let Some(max) = self.max_concurrent_streams {
            server = server.max_concurrent_streams(Some(max));
        }
        if let Some(interval) = self.http2_keepalive_interval {
            server = server.http2_keepalive_interval(Some(interval));
        }
        if let Some(size) = self.initial_stream_window_size {
            server = server.initial_stream_window_size(Some(size));
        }
        if let Some(size) = self.max_frame_size {
            server = server.max_frame_size(Some(size));
        }
        server
    }
}

fn set_once<T>(
    slot: &mut Option<T>,
    option: &'static str,
    value: T,
) -> Result<(), ConfigError> {
    if slot.is_some() {
        return Err(ConfigError::Conflict(option));
    }
    *slot = Some(value);
    Ok(())
}

/// Per-request timeout.
pub fn timeout(timeout: Duration) -> ServerOption {
    Box::new(move |mut cfg: ServerConfig| {
        if timeout.is_zero() {
            return Err(ConfigError::invalid_option("timeout", "must be positive"));
        }
        set_once(&mut cfg.timeout, "timeout", timeout)?;
        Ok(cfg)
    })
}

pub fn concurrency_limit_per_connection(limit: usize) -> ServerOption {
    Box::new(move |mut cfg: ServerConfig| {
        if limit == 0 {
            return Err(ConfigError::invalid_option(
                "concurrency_limit_per_connection",
                "must be positive",
            ));
        }
        set_once(
            &mut cfg.concurrency_limit_per_connection,
            "concurrency_limit_per_connection",
            limit,
        )?;
        Ok(cfg)
    })
}

pub fn max_concurrent_streams(max: u32) -> ServerOption {
    Box::new(move |mut cfg: ServerConfig| {
        if max == 0 {
            return Err(ConfigError::invalid_option(
                "max_concurrent_streams",
                "must be positive",
            ));
        }
        set_once(&mut cfg.max_concurrent_streams, "max_concurrent_streams", max)?;
        Ok(cfg)
    })
}

/// Interval between HTTP/2 PING frames sent to idle clients.
pub fn http2_keepalive_interval(interval: Duration) -> ServerOption {
    Box::new(move |mut cfg: ServerConfig| {
        if interval.is_zero() {
            return Err(ConfigError::invalid_option(
                "http2_keepalive_interval",
                "must be positive",
            ));
        }
        set_once(
            &mut cfg.http2_keepalive_interval,
            "http2_keepalive_interval",
            interval,
        )?;
        Ok(cfg)
    })
}

pub fn initial_stream_window_size(size: u32) -> ServerOption {
    Box::new(move |mut cfg: ServerConfig| {
        if size == 0 || size > MAX_WINDOW_SIZE {
            return Err(ConfigError::invalid_option(
                "initial_stream_window_size",
                format!("must be in 1..={MAX_WINDOW_SIZE}"),
            ));
        }
        set_once(
            &mut cfg.initial_stream_window_size,
            "initial_stream_window_size",
            size,
        )?;
        Ok(cfg)
    })
}

pub fn max_frame_size(size: u32) -> ServerOption {
    Box::new(move |mut cfg: ServerConfig| {
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&size) {
            return Err(ConfigError::invalid_option(
                "max_frame_size",
                format!("must be in {MIN_FRAME_SIZE}..={MAX_FRAME_SIZE}"),
            ));
        }
        set_once(&mut cfg.max_frame_size, "max_frame_size", size)?;
        Ok(cfg)
    })
}
