use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

/// Rejected while configuring or creating a component. No socket is held.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("port is invalid: {0}")]
    InvalidPort(i32),

    #[error("host is invalid: {host}")]
    InvalidHost {
        host: String,
        #[source]
        source: AddrParseError,
    },

    #[error("option {0} is already set")]
    Conflict(&'static str),

    #[error("option {option} is invalid: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid_option(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("failed to register listener with the runtime: {0}")]
    Listener(#[source] std::io::Error),

    #[error("server stopped with error: {0}")]
    Serve(#[from] tonic::transport::Error),
}
