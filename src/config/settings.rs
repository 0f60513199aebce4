//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::time::Duration;

use serde::Deserialize;

use crate::bridge::{BridgeSettings, ReconnectPolicy, TimeoutPolicy};
use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Relay host name, or a `ws://` URL without port.
    #[serde(default = "default_server")]
    pub server: String,

    /// Relay port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Channel to join on every connection.
    #[serde(default)]
    pub channel: Option<String>,

    /// Reconnection settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Command timeout settings.
    #[serde(default)]
    pub commands: CommandConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            _schema: None,
            _comment: None,
            server: default_server(),
            port: default_port(),
            channel: None,
            reconnect: ReconnectConfig::default(),
            commands: CommandConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "server must not be empty".to_string(),
            });
        }
        if self.server.trim().starts_with("wss://") {
            return Err(ConfigError::ValidationError {
                message: "wss:// relays are not supported; use a ws:// relay on a trusted network"
                    .to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "port must be between 1 and 65535".to_string(),
            });
        }
        if self.channel.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::ValidationError {
                message: "channel must not be empty when set".to_string(),
            });
        }
        if self.reconnect.interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "reconnect.interval_ms must be greater than 0".to_string(),
            });
        }
        if self.reconnect.max_delay_ms < self.reconnect.interval_ms {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "reconnect.max_delay_ms ({}) must be at least reconnect.interval_ms ({})",
                    self.reconnect.max_delay_ms, self.reconnect.interval_ms
                ),
            });
        }
        if self.commands.timeout_ms == 0 || self.commands.progress_window_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "command timeouts must be greater than 0".to_string(),
            });
        }
        if self.commands.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "commands.connect_timeout_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// WebSocket URL of the relay.
    ///
    /// A bare host gets the `ws://` scheme.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        let server = self.server.trim().trim_end_matches('/');
        if server.starts_with("ws://") {
            format!("{server}:{}", self.port)
        } else {
            format!("ws://{server}:{}", self.port)
        }
    }

    /// Bridge settings derived from this configuration.
    #[must_use]
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            url: self.websocket_url(),
            timeouts: TimeoutPolicy {
                base: Duration::from_millis(self.commands.timeout_ms),
                max_extensions: self.commands.max_extensions,
                progress_window: Duration::from_millis(self.commands.progress_window_ms),
            },
            reconnect: ReconnectPolicy {
                base_interval: Duration::from_millis(self.reconnect.interval_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            connect_timeout: Duration::from_millis(self.commands.connect_timeout_ms),
            default_channel: self.channel.clone(),
        }
    }
}

fn default_server() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    3055
}

/// Reconnection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Base reconnect interval in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub interval_ms: u64,

    /// Upper bound on any reconnect delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Consecutive failed attempts before giving up. Unlimited if absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconnect_interval(),
            max_delay_ms: default_max_delay(),
            max_attempts: None,
        }
    }
}

const fn default_reconnect_interval() -> u64 {
    2000
}

const fn default_max_delay() -> u64 {
    30_000
}

/// Command timeout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Base command timeout in milliseconds.
    #[serde(default = "default_command_timeout")]
    pub timeout_ms: u64,

    /// Timeout extensions granted to a silent command.
    #[serde(default = "default_max_extensions")]
    pub max_extensions: u32,

    /// Window granted by each progress update, in milliseconds.
    #[serde(default = "default_command_timeout")]
    pub progress_window_ms: u64,

    /// WebSocket handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_command_timeout(),
            max_extensions: default_max_extensions(),
            progress_window_ms: default_command_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

const fn default_command_timeout() -> u64 {
    60_000
}

const fn default_max_extensions() -> u32 {
    3
}

const fn default_connect_timeout() -> u64 {
    10_000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server, "localhost");
        assert_eq!(config.port, 3055);
        assert_eq!(config.reconnect.interval_ms, 2000);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": "relay.internal",
            "port": 4000,
            "channel": "design-review",
            "reconnect": {
                "interval_ms": 500,
                "max_delay_ms": 5000,
                "max_attempts": 8
            },
            "commands": {
                "timeout_ms": 30000,
                "max_extensions": 2,
                "progress_window_ms": 45000,
                "connect_timeout_ms": 3000
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.websocket_url(), "ws://relay.internal:4000");
        assert_eq!(config.channel.as_deref(), Some("design-review"));
        assert_eq!(config.reconnect.max_attempts, Some(8));
        assert_eq!(config.commands.max_extensions, 2);
        assert_eq!(config.logging.level, "debug");

        let settings = config.bridge_settings();
        assert_eq!(settings.timeouts.base, Duration::from_secs(30));
        assert_eq!(settings.timeouts.progress_window, Duration::from_secs(45));
        assert_eq!(settings.reconnect.max_delay, Duration::from_secs(5));
        assert_eq!(settings.connect_timeout, Duration::from_secs(3));
        assert_eq!(settings.default_channel.as_deref(), Some("design-review"));
    }

    #[test]
    fn explicit_scheme_kept() {
        let config = Config {
            server: "ws://relay.example.com/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.websocket_url(), "ws://relay.example.com:3055");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tls_relay_rejected() {
        let config = Config {
            server: "wss://relay.example.com".to_string(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
        assert!(err.to_string().contains("wss://"));
    }

    #[test]
    fn command_config_defaults() {
        let config = CommandConfig::default();
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.max_extensions, 3);
        assert_eq!(config.progress_window_ms, 60_000);
        assert_eq!(config.connect_timeout_ms, 10_000);
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_zero_port() {
        let config: Config = serde_json::from_str(r#"{"port": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_delay_below_interval() {
        let json = r#"{"reconnect": {"interval_ms": 5000, "max_delay_ms": 1000}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_blank_channel() {
        let config: Config = serde_json::from_str(r#"{"channel": "  "}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
