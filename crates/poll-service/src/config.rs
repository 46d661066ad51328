//! Poll service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::{DEFAULT_TIMER_SECONDS, MAX_TIMER_SECONDS};

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default bound on each persistence call, in milliseconds.
pub const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 2000;

/// Default cap on live connections per namespace.
pub const DEFAULT_MAX_CONNECTIONS_PER_NAMESPACE: usize = 500;

/// Default deadline for coordinator shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "POLL_LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Poll service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address.
    pub bind_address: String,

    /// Postgres URL. `None` selects the in-memory store.
    pub database_url: Option<SecretString>,

    /// Timer applied when a poll creation request omits one.
    pub default_timer_seconds: u32,

    /// Bound on each persistence call made by a namespace actor.
    pub persistence_timeout: Duration,

    /// Connections beyond this are refused with `CapacityExceeded`.
    pub max_connections_per_namespace: usize,

    pub log_format: LogFormat,

    /// Deadline for draining namespace actors on shutdown.
    pub shutdown_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("default_timer_seconds", &self.default_timer_seconds)
            .field("persistence_timeout", &self.persistence_timeout)
            .field(
                "max_connections_per_namespace",
                &self.max_connections_per_namespace,
            )
            .field("log_format", &self.log_format)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            database_url: None,
            default_timer_seconds: DEFAULT_TIMER_SECONDS,
            persistence_timeout: Duration::from_millis(DEFAULT_PERSISTENCE_TIMEOUT_MS),
            max_connections_per_namespace: DEFAULT_MAX_CONNECTIONS_PER_NAMESPACE,
            log_format: LogFormat::Text,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = match (vars.get("POLL_BIND_ADDRESS"), vars.get("PORT")) {
            (Some(address), _) => address.clone(),
            (None, Some(port)) => {
                let port: u16 = parse_value("PORT", port)?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => DEFAULT_BIND_ADDRESS.to_string(),
        };

        let database_url = vars
            .get("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let default_timer_seconds = optional_value(vars, "POLL_DEFAULT_TIMER_SECONDS")?
            .unwrap_or(DEFAULT_TIMER_SECONDS);
        if default_timer_seconds == 0 || default_timer_seconds > MAX_TIMER_SECONDS {
            return Err(ConfigError::InvalidValue(format!(
                "POLL_DEFAULT_TIMER_SECONDS must be between 1 and {MAX_TIMER_SECONDS}"
            )));
        }

        let persistence_timeout_ms = optional_value(vars, "POLL_PERSISTENCE_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_PERSISTENCE_TIMEOUT_MS);
        if persistence_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_PERSISTENCE_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        let max_connections_per_namespace =
            optional_value(vars, "POLL_MAX_CONNECTIONS_PER_NAMESPACE")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_NAMESPACE);
        if max_connections_per_namespace == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_MAX_CONNECTIONS_PER_NAMESPACE must be positive".to_string(),
            ));
        }

        let log_format = vars
            .get("POLL_LOG_FORMAT")
            .map(|s| s.parse::<LogFormat>())
            .transpose()?
            .unwrap_or_default();

        let shutdown_timeout_seconds = optional_value(vars, "POLL_SHUTDOWN_TIMEOUT_SECONDS")?
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS);

        Ok(Config {
            bind_address,
            database_url,
            default_timer_seconds,
            persistence_timeout: Duration::from_millis(persistence_timeout_ms),
            max_connections_per_namespace,
            log_format,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
        })
    }
}

fn optional_value<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    vars.get(key).map(|raw| parse_value(key, raw)).transpose()
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{key} has invalid value '{raw}'")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.database_url.is_none());
        assert_eq!(config.default_timer_seconds, 60);
        assert_eq!(config.persistence_timeout, Duration::from_millis(2000));
        assert_eq!(config.max_connections_per_namespace, 500);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_port_fallback() {
        let config = Config::from_vars(&vars(&[("PORT", "5000")])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:5000");

        let config = Config::from_vars(&vars(&[
            ("PORT", "5000"),
            ("POLL_BIND_ADDRESS", "127.0.0.1:7000"),
        ]))
        .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:7000");
    }

    #[test]
    fn test_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://poll:pw@localhost/poll"),
            ("POLL_DEFAULT_TIMER_SECONDS", "30"),
            ("POLL_PERSISTENCE_TIMEOUT_MS", "250"),
            ("POLL_MAX_CONNECTIONS_PER_NAMESPACE", "40"),
            ("POLL_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(
            config.database_url.as_ref().unwrap().expose_secret(),
            "postgres://poll:pw@localhost/poll"
        );
        assert_eq!(config.default_timer_seconds, 30);
        assert_eq!(config.persistence_timeout, Duration::from_millis(250));
        assert_eq!(config.max_connections_per_namespace, 40);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (key, value) in [
            ("POLL_DEFAULT_TIMER_SECONDS", "0"),
            ("POLL_DEFAULT_TIMER_SECONDS", "soon"),
            ("POLL_DEFAULT_TIMER_SECONDS", "86401"),
            ("POLL_PERSISTENCE_TIMEOUT_MS", "-5"),
            ("POLL_MAX_CONNECTIONS_PER_NAMESPACE", "0"),
            ("POLL_LOG_FORMAT", "xml"),
            ("PORT", "99999"),
        ] {
            let result = Config::from_vars(&vars(&[(key, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_blank_database_url_means_in_memory() {
        let config = Config::from_vars(&vars(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let config =
            Config::from_vars(&vars(&[("DATABASE_URL", "postgres://user:hunter2@db/poll")]))
                .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
