//! Configuration module for pingwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::probe::DEFAULT_PING_PROGRAM;
use crate::scheduler::MonitorConfig;

/// Configuration error types.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("at least one target must be specified")]
    NoTargets,
    #[error("interval must be positive")]
    InvalidInterval,
    #[error("timeout must be positive")]
    InvalidTimeout,
    #[error("database path cannot be empty")]
    EmptyDbPath,
    #[error("port must be between 1 and 65535")]
    InvalidPort,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "network_monitor.db")
    pub db_path: String,
    /// Hosts or addresses to probe
    pub targets: Vec<String>,
    /// Time between probes of the same target (default: 1s)
    pub interval: Duration,
    /// Per-probe timeout (default: 5s)
    pub timeout: Duration,
    /// Reachability binary (default: "ping")
    pub ping_program: String,
    /// Where to write a summary report on shutdown (default: none)
    pub report_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "network_monitor.db".to_string(),
            targets: parse_targets("8.8.8.8,1.1.1.1,208.67.222.222"),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            ping_program: DEFAULT_PING_PROGRAM.to_string(),
            report_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PINGWATCH_DB_PATH`: Database file path (default: "network_monitor.db")
    /// - `PINGWATCH_TARGETS`: Comma-separated targets (default: "8.8.8.8,1.1.1.1,208.67.222.222")
    /// - `PINGWATCH_INTERVAL_SECS`: Probe interval in seconds (default: 1)
    /// - `PINGWATCH_TIMEOUT_SECS`: Probe timeout in seconds (default: 5)
    /// - `PINGWATCH_PING_PROGRAM`: Ping binary (default: "ping")
    /// - `PINGWATCH_REPORT_DIR`: Directory for the shutdown report (default: unset)
    ///
    /// Unparseable values fall back to the default.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = lookup("PINGWATCH_HTTP_PORT").and_then(|v| v.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("PINGWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(targets) = lookup("PINGWATCH_TARGETS") {
            cfg.targets = parse_targets(&targets);
        }

        if let Some(interval) = lookup("PINGWATCH_INTERVAL_SECS").and_then(|v| parse_secs(&v)) {
            cfg.interval = interval;
        }

        if let Some(timeout) = lookup("PINGWATCH_TIMEOUT_SECS").and_then(|v| parse_secs(&v)) {
            cfg.timeout = timeout;
        }

        if let Some(program) = lookup("PINGWATCH_PING_PROGRAM") {
            cfg.ping_program = program;
        }

        cfg.report_dir = lookup("PINGWATCH_REPORT_DIR").filter(|d| !d.trim().is_empty());

        cfg
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::EmptyDbPath);
        }
        if self.http_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new(self.targets.clone(), self.interval, self.timeout)
    }
}

fn parse_targets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "network_monitor.db");
        assert_eq!(cfg.targets, vec!["8.8.8.8", "1.1.1.1", "208.67.222.222"]);
        assert_eq!(cfg.interval, Duration::from_secs(1));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.report_dir, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_overrides() {
        let cfg = load_from(&[
            ("PINGWATCH_HTTP_PORT", "9090"),
            ("PINGWATCH_TARGETS", " 10.0.0.1, ,example.com "),
            ("PINGWATCH_INTERVAL_SECS", "2.5"),
            ("PINGWATCH_TIMEOUT_SECS", "not-a-number"),
            ("PINGWATCH_REPORT_DIR", "/var/lib/pingwatch"),
        ]);
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.targets, vec!["10.0.0.1", "example.com"]);
        assert_eq!(cfg.interval, Duration::from_millis(2500));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.report_dir.as_deref(), Some("/var/lib/pingwatch"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = load_from(&[("PINGWATCH_TARGETS", " , ")]);
        assert_eq!(cfg.validate(), Err(ConfigError::NoTargets));

        let cfg = load_from(&[("PINGWATCH_INTERVAL_SECS", "0")]);
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidInterval));

        let cfg = load_from(&[("PINGWATCH_TIMEOUT_SECS", "-1")]);
        assert_eq!(cfg.timeout, Duration::from_secs(5));

        let cfg = load_from(&[("PINGWATCH_DB_PATH", "")]);
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyDbPath));

        let cfg = load_from(&[("PINGWATCH_HTTP_PORT", "0")]);
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidPort));
    }
}
