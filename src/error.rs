//! Error types for figma-mcp-bridge.
//!
//! Two families live here: [`ConfigError`] for startup problems and
//! [`BridgeError`] for everything that can go wrong with a command sent to
//! the Figma plugin. Bridge errors are `Clone` because a single connection
//! loss is fanned out to every request that was in flight.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors returned to callers of the command bridge.
///
/// Precondition errors (`NotConnected`, `NoChannel`, `InvalidParams`) are
/// raised before anything is registered or sent. The rest settle a request
/// that was already in flight.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The socket is not open and no lazy connection applies.
    #[error("not connected to Figma")]
    NotConnected,

    /// A non-join command was sent before joining a channel.
    #[error("must join a channel before sending '{command}'")]
    NoChannel {
        /// The command that was refused.
        command: String,
    },

    /// Reconnection gave up after the configured number of attempts.
    #[error("connection to Figma lost after {attempts} reconnection attempts")]
    ReconnectExhausted {
        /// Consecutive attempts made before giving up.
        attempts: u32,
    },

    /// Command parameters were not a JSON object.
    #[error("invalid parameters for '{command}': {message}")]
    InvalidParams {
        /// The command that was refused.
        command: String,
        /// What was wrong with the parameters.
        message: String,
    },

    /// Serialising or writing the envelope failed.
    #[error("failed to send command: {message}")]
    Transmission {
        /// Description of the write failure.
        message: String,
    },

    /// The plugin answered with an error.
    #[error("{message}")]
    Remote {
        /// Error message reported by the plugin.
        message: String,
    },

    /// No reply arrived after every timeout extension was used.
    #[error("request '{command}' timed out after {elapsed_ms} ms")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// Total time spent waiting.
        elapsed_ms: u128,
    },

    /// The socket closed while the request was pending.
    #[error("connection closed (code {code}): {reason}")]
    ConnectionClosed {
        /// WebSocket close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },

    /// The connection attempt made on behalf of a deferred command failed.
    #[error("failed to connect to {url}: {message}")]
    ConnectFailed {
        /// URL that was dialled.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// The bridge task is no longer running.
    #[error("bridge has shut down")]
    Stopped,

    /// A request id collided with one already in flight.
    #[error("duplicate request id: {id}")]
    DuplicateId {
        /// The colliding id.
        id: String,
    },
}

impl BridgeError {
    /// Returns `true` for errors raised before the request was registered.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::NoChannel { .. }
                | Self::InvalidParams { .. }
                | Self::ReconnectExhausted { .. }
        )
    }
}
