use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default port offered to the user when nothing else is configured.
pub const DEFAULT_PORT: u16 = 8000;

/// Default graceful termination window.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;

/// Runtime settings of the lifecycle manager.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
///
/// # JSON Schema
///
/// ```json
/// {
///   "defaultPort": 8000,
///   "bindHost": "0.0.0.0",
///   "pythonCommand": "python3",
///   "phpCommand": "php",
///   "gracePeriodMs": 5000,
///   "livenessDelayMs": 1500,
///   "readyTimeoutMs": 3000,
///   "releaseTimeoutMs": 2000,
///   "staticWorkers": 2,
///   "logHistory": 1000,
///   "eventHistory": 1000,
///   "earlyOutputLines": 20
/// }
/// ```
///
/// # Examples
///
/// ```
/// use devserve::config::Config;
///
/// let config = Config::parse_from_str(r#"{ "pythonCommand": "/usr/bin/python3.12" }"#).unwrap();
/// assert_eq!(config.python_command, "/usr/bin/python3.12");
/// assert_eq!(config.default_port, 8000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Port pre-filled by a front end.
    pub default_port: u16,

    /// Interface every launched server binds to.
    pub bind_host: String,

    /// Interpreter used for Flask and Django.
    pub python_command: String,

    /// PHP CLI used for the built-in server.
    pub php_command: String,

    /// How long a server gets to exit after a graceful stop request.
    pub grace_period_ms: u64,

    /// Delay between spawn and the first liveness poll.
    pub liveness_delay_ms: u64,

    /// Upper bound on waiting for the server to accept connections.
    pub ready_timeout_ms: u64,

    /// Upper bound on waiting for the port to be free again after teardown.
    pub release_timeout_ms: u64,

    /// Worker threads of the in-process static file listener.
    pub static_workers: usize,

    /// Number of log lines kept in memory.
    pub log_history: usize,

    /// Number of lifecycle records kept in memory.
    pub event_history: usize,

    /// Lines of output attached to an immediate-exit error.
    pub early_output_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            bind_host: "0.0.0.0".to_string(),
            python_command: default_python().to_string(),
            php_command: "php".to_string(),
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            liveness_delay_ms: 1_500,
            ready_timeout_ms: 3_000,
            release_timeout_ms: 2_000,
            static_workers: 2,
            log_history: 1_000,
            event_history: 1_000,
            early_output_lines: 20,
        }
    }
}

fn default_python() -> &'static str {
    if cfg!(windows) { "python" } else { "python3" }
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * A field has the wrong type
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn liveness_delay(&self) -> Duration {
        Duration::from_millis(self.liveness_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config_str = r#"{
            "bindHost": "127.0.0.1",
            "gracePeriodMs": 250
        }"#;

        let config = Config::parse_from_str(config_str).unwrap();

        assert_eq!(config.bind_host, "127.0.0.1");
        assert_eq!(config.grace_period(), Duration::from_millis(250));
        assert_eq!(config.php_command, "php");
        assert_eq!(config.static_workers, 2);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let result = Config::parse_from_str(r#"{ "defaultPort": "eighty" }"#);
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }
}
