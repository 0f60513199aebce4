//! The public entry point for sending commands to Figma.
//!
//! [`FigmaBridge`] is a cheap, cloneable handle. Each bridge owns its own
//! connection task, so several independent bridges can live in one process.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::bridge::backoff::ReconnectPolicy;
use crate::bridge::connection::{BridgeCommand, ConnectionTask};
use crate::bridge::session::CommandRequest;
use crate::bridge::timeout::TimeoutPolicy;
use crate::error::BridgeError;

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a bridge needs to reach the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// WebSocket URL of the relay, e.g. `ws://localhost:3055`.
    pub url: String,
    /// Request timeouts.
    pub timeouts: TimeoutPolicy,
    /// Reconnection behaviour.
    pub reconnect: ReconnectPolicy,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Channel joined automatically on every connection.
    pub default_channel: Option<String>,
}

impl BridgeSettings {
    /// Settings with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeouts: TimeoutPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            default_channel: None,
        }
    }

    /// Sets the channel to join on connect.
    #[must_use]
    pub fn with_default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = Some(channel.into());
        self
    }
}

/// Handle for sending commands to the Figma plugin.
#[derive(Debug, Clone)]
pub struct FigmaBridge {
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl FigmaBridge {
    /// Spawns the connection task on the current Tokio runtime.
    ///
    /// No connection is opened until the first command is sent.
    #[must_use]
    pub fn start(settings: BridgeSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(ConnectionTask::new(settings, rx).run());
        Self { commands: tx }
    }

    /// Sends `command` with `params` and waits for the plugin's reply.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the command cannot be sent, the plugin
    /// reports an error, the request times out or the connection drops.
    pub async fn send_command(&self, command: &str, params: Value) -> Result<Value, BridgeError> {
        self.send_command_with_timeout(command, params, None).await
    }

    /// As [`FigmaBridge::send_command`], with a per-command base timeout.
    ///
    /// # Errors
    ///
    /// See [`FigmaBridge::send_command`].
    pub async fn send_command_with_timeout(
        &self,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let request = CommandRequest::new(command, params, tx).with_timeout(timeout);
        debug!(command, "Submitting command");
        self.submit(request, rx).await
    }

    /// Joins `channel`; later commands are addressed to it.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the join is refused or never answered.
    pub async fn join_channel(&self, channel: &str) -> Result<Value, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.submit(CommandRequest::join(channel, tx), rx).await
    }

    /// The channel the connection has joined, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Stopped`] if the bridge is no longer running.
    pub async fn current_channel(&self) -> Result<Option<String>, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(BridgeCommand::CurrentChannel(tx))
            .map_err(|_| BridgeError::Stopped)?;
        rx.await.map_err(|_| BridgeError::Stopped)
    }

    /// Closes the socket, rejects outstanding requests with
    /// [`BridgeError::Stopped`] and waits for the connection task to finish.
    ///
    /// Returns at once if the task has already stopped.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(BridgeCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn submit(
        &self,
        request: CommandRequest,
        rx: oneshot::Receiver<Result<Value, BridgeError>>,
    ) -> Result<Value, BridgeError> {
        self.commands
            .send(BridgeCommand::Send(request))
            .map_err(|_| BridgeError::Stopped)?;
        rx.await.map_err(|_| BridgeError::Stopped)?
    }
}
