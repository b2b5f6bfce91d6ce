//! Process-wide logging and tracing setup.
//!
//! Installs a `tracing` subscriber and, when enabled, an OpenTelemetry tracer
//! provider with W3C Trace Context propagation. Libraries never call this;
//! binaries do, once, at startup.

mod init;

use serde::Deserialize;

pub use init::{TelemetryGuard, init_telemetry};

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// Export spans through OpenTelemetry; logs are always emitted.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Service version reported on the resource and on every span.
    #[serde(default = "default_service_version")]
    pub service_version: String,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `json` or `text`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            service_name: default_service_name(),
            service_version: default_service_version(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

pub fn default_enabled() -> bool {
    true
}

pub fn default_service_name() -> String {
    "conduit".to_string()
}

pub fn default_service_version() -> String {
    "dev".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "text".to_string()
}
