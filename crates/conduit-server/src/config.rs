use std::collections::HashMap;

use conduit_core::telemetry::{self, TelemetrySettings};
use config::{Config, ConfigError, Environment};
use serde::Deserialize;

const ENV_PREFIX: &str = "CONDUIT";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// Signed so that out-of-range values reach component validation.
    #[serde(default = "default_port")]
    pub port: i32,
    /// Per-request timeout; 0 leaves it unset.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Settings {
    /// Load settings from built-in defaults and `CONDUIT_*` environment variables.
    ///
    /// Sections and keys are separated by a double underscore, e.g.
    /// `CONDUIT_SERVER__PORT` or `CONDUIT_TELEMETRY__LOG_FORMAT`.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_env(None)
    }

    fn from_env(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.timeout_secs", 0_i64)?
            .set_default("telemetry.enabled", telemetry::default_enabled())?
            .set_default("telemetry.service_name", telemetry::default_service_name())?
            .set_default(
                "telemetry.service_version",
                env!("CARGO_PKG_VERSION").to_string(),
            )?
            .set_default("telemetry.log_level", telemetry::default_log_level())?
            .set_default("telemetry.log_format", telemetry::default_log_format())?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> i32 {
    50051
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_env(vars(&[])).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 50051);
        assert_eq!(settings.server.timeout_secs, 0);
        assert!(settings.telemetry.enabled);
        assert_eq!(settings.telemetry.service_name, "conduit");
        assert_eq!(settings.telemetry.log_format, "text");
    }

    #[test]
    fn test_environment_overrides() {
        let settings = Settings::from_env(vars(&[
            ("CONDUIT_SERVER__HOST", "127.0.0.1"),
            ("CONDUIT_SERVER__PORT", "6000"),
            ("CONDUIT_SERVER__TIMEOUT_SECS", "15"),
            ("CONDUIT_TELEMETRY__ENABLED", "false"),
            ("CONDUIT_TELEMETRY__LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 6000);
        assert_eq!(settings.server.timeout_secs, 15);
        assert!(!settings.telemetry.enabled);
        assert_eq!(settings.telemetry.log_format, "json");
    }

    #[test]
    fn test_invalid_port_value_fails() {
        let result = Settings::from_env(vars(&[("CONDUIT_SERVER__PORT", "not-a-number")]));
        assert!(result.is_err());
    }
}
