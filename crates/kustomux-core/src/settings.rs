//! Runtime settings for the router.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Settings shared by the supervisor, health loop, and upstream bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSettings {
    /// Seconds between health-loop ticks.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Deadline for a single protocol-level ping.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    /// Ceiling for the per-endpoint reconnect backoff.
    #[serde(default = "default_max_backoff")]
    pub max_reconnect_backoff_secs: u64,
    #[serde(default = "default_true")]
    pub read_only: bool,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_ping_interval() -> u64 {
    60
}
fn default_ping_timeout() -> u64 {
    10
}
fn default_max_backoff() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            max_reconnect_backoff_secs: default_max_backoff(),
            read_only: true,
            log_level: LogLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level '{other}' (expected debug|info|warn|error)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = RouterSettings::default();
        assert_eq!(settings.ping_interval_secs, 60);
        assert_eq!(settings.ping_timeout_secs, 10);
        assert_eq!(settings.max_reconnect_backoff_secs, 300);
        assert!(settings.read_only);
        assert_eq!(settings.log_level, LogLevel::Info);
    }

    #[test]
    fn test_settings_deserialize_empty() {
        let settings: RouterSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.ping_interval_secs, 60);
        assert!(settings.read_only);
    }

    #[test]
    fn test_log_level_round_trip() {
        for (text, level) in [
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            assert_eq!(text.parse::<LogLevel>().unwrap(), level);
            assert_eq!(level.to_string(), text);
        }
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
