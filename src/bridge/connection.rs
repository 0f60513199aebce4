//! The connection task: one WebSocket, reconnected on loss.
//!
//! The task owns the socket and the [`Session`]. Callers reach it through
//! [`BridgeCommand`]s on an unbounded channel; it multiplexes those with
//! socket frames, request deadlines and the reconnect timer in a single
//! `select!` loop, so every state change happens on one task.
//!
//! Lifecycle:
//!
//! 1. `Idle` until the first command arrives, which is deferred while a
//!    connection is opened.
//! 2. On open, channel membership is reset. With a default channel the task
//!    joins it before replaying deferred commands.
//! 3. On close, every pending request fails and a reconnect is scheduled
//!    after a jittered backoff.
//! 4. A failed connection attempt is retried after the base interval, until
//!    the optional attempt ceiling is reached.

use std::future::pending;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::bridge::backoff::ReconnectState;
use crate::bridge::dispatch::BridgeSettings;
use crate::bridge::registry::Outcome;
use crate::bridge::session::{CommandRequest, Session};
use crate::error::BridgeError;

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status.
const NO_STATUS: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type ConnectResult = Result<WsStream, String>;

/// Messages from [`crate::bridge::FigmaBridge`] handles to the task.
#[derive(Debug)]
pub enum BridgeCommand {
    /// Send a command.
    Send(CommandRequest),
    /// Report the joined channel.
    CurrentChannel(oneshot::Sender<Option<String>>),
    /// Close the socket and stop, then acknowledge.
    Shutdown(oneshot::Sender<()>),
}

/// Where the socket is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No socket has been opened yet.
    Idle,
    /// A connection attempt is running.
    Connecting,
    /// The socket is open.
    Open,
    /// Waiting for the reconnect timer.
    Backoff,
    /// Reconnection gave up.
    Exhausted { attempts: u32 },
}

/// State owned by the connection task.
pub struct ConnectionTask {
    settings: BridgeSettings,
    session: Session,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    phase: Phase,
    socket: Option<WsStream>,
    connecting: Option<JoinHandle<ConnectResult>>,
    reconnect_at: Option<Instant>,
    reconnect: ReconnectState,
    deferred: Vec<CommandRequest>,
    default_join: Option<oneshot::Receiver<Outcome>>,
}

impl ConnectionTask {
    /// Creates the task state; nothing is dialled until a command arrives.
    #[must_use]
    pub fn new(settings: BridgeSettings, commands: mpsc::UnboundedReceiver<BridgeCommand>) -> Self {
        let session = Session::new(settings.timeouts);
        Self {
            settings,
            session,
            commands,
            phase: Phase::Idle,
            socket: None,
            connecting: None,
            reconnect_at: None,
            reconnect: ReconnectState::default(),
            deferred: Vec::new(),
            default_join: None,
        }
    }

    /// Runs until shut down or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            let deadline = self.session.next_deadline();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(BridgeCommand::Send(request)) => self.on_send(request).await,
                    Some(BridgeCommand::CurrentChannel(tx)) => {
                        let _ = tx.send(self.session.current_channel().map(str::to_string));
                    }
                    Some(BridgeCommand::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },

                frame = next_frame(&mut self.socket) => self.on_frame(frame),

                result = finish_connect(&mut self.connecting) => self.on_connect_result(result).await,

                outcome = await_default_join(&mut self.default_join) => {
                    self.on_default_join(outcome).await;
                }

                () = sleep_until_some(deadline) => {
                    self.session.on_tick(Instant::now());
                }

                () = sleep_until_some(reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            }
        }
    }

    async fn on_send(&mut self, request: CommandRequest) {
        match self.phase {
            Phase::Idle => {
                debug!(command = %request.command, "Deferring command until connected");
                self.deferred.push(request);
                self.start_connect();
            }
            Phase::Connecting => self.deferred.push(request),
            Phase::Open if self.default_join.is_some() => self.deferred.push(request),
            Phase::Open => self.dispatch(request).await,
            Phase::Backoff => request.fail(BridgeError::NotConnected),
            Phase::Exhausted { attempts } => {
                request.fail(BridgeError::ReconnectExhausted { attempts });
            }
        }
    }

    /// Registers and writes one command. Only called while open.
    async fn dispatch(&mut self, request: CommandRequest) {
        if self.socket.is_none() {
            request.fail(BridgeError::NotConnected);
            return;
        }

        let Some(outbound) = self.session.submit(request, Instant::now()) else {
            return;
        };

        let Some(ws) = self.socket.as_mut() else {
            self.session
                .transmit_failed(&outbound.id, BridgeError::NotConnected);
            return;
        };

        if let Err(e) = ws.send(Message::Text(outbound.text.into())).await {
            warn!(id = %outbound.id, error = %e, "Failed to write command");
            self.session.transmit_failed(
                &outbound.id,
                BridgeError::Transmission {
                    message: e.to_string(),
                },
            );
        } else {
            debug!(id = %outbound.id, "Command sent");
        }
    }

    async fn replay_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            debug!(count = deferred.len(), "Replaying deferred commands");
        }
        for request in deferred {
            self.dispatch(request).await;
        }
    }

    fn fail_deferred(&mut self, error: &BridgeError) {
        for request in self.deferred.drain(..) {
            request.fail(error.clone());
        }
    }

    /// Opens a socket unless one is open or being opened.
    fn start_connect(&mut self) {
        if self.socket.is_some() || self.connecting.is_some() {
            return;
        }

        let url = self.settings.url.clone();
        let limit = self.settings.connect_timeout;
        info!(url = %url, "Connecting to Figma relay");

        self.phase = Phase::Connecting;
        self.connecting = Some(tokio::spawn(async move {
            match tokio::time::timeout(limit, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "connection timed out after {} ms",
                    limit.as_millis()
                )),
            }
        }));
    }

    async fn on_connect_result(&mut self, result: ConnectResult) {
        match result {
            Ok(stream) => {
                info!(url = %self.settings.url, "Connected to Figma relay");
                self.socket = Some(stream);
                self.phase = Phase::Open;
                self.reconnect.reset();
                self.session.on_open();

                if let Some(channel) = self.settings.default_channel.clone() {
                    let (tx, rx) = oneshot::channel();
                    self.default_join = Some(rx);
                    self.dispatch(CommandRequest::join(&channel, tx)).await;
                } else {
                    self.replay_deferred().await;
                }
            }
            Err(message) => {
                warn!(url = %self.settings.url, error = %message, "Connection attempt failed");
                self.fail_deferred(&BridgeError::ConnectFailed {
                    url: self.settings.url.clone(),
                    message,
                });
                let retry = self.settings.reconnect.base_interval;
                self.schedule_reconnect(retry);
            }
        }
    }

    async fn on_default_join(&mut self, outcome: Outcome) {
        match outcome {
            Ok(_) => self.replay_deferred().await,
            Err(e) => {
                warn!(error = %e, "Failed to join default channel");
                self.fail_deferred(&e);
            }
        }
    }

    fn on_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match frame {
            Some(Ok(Message::Text(text))) => {
                self.session.on_message(text.as_str(), Instant::now());
            }
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    self.session.on_message(text, Instant::now());
                }
                Err(e) => warn!(error = %e, "Ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame.map_or_else(
                    || (NO_STATUS, String::new()),
                    |f| (u16::from(f.code), f.reason.to_string()),
                );
                self.on_socket_closed(code, &reason);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Err(e)) => {
                // A tungstenite error ends the stream; there is no separate close event.
                error!(error = %e, "WebSocket error");
                self.on_socket_closed(ABNORMAL_CLOSURE, &e.to_string());
            }
            None => self.on_socket_closed(ABNORMAL_CLOSURE, "connection ended"),
        }
    }

    fn on_socket_closed(&mut self, code: u16, reason: &str) {
        warn!(code, reason, "Disconnected from Figma relay");
        self.socket = None;
        self.default_join = None;
        self.session.on_close(code, reason);
        self.fail_deferred(&BridgeError::ConnectionClosed {
            code,
            reason: reason.to_string(),
        });

        let delay = self.settings.reconnect.jittered_delay();
        self.schedule_reconnect(delay);
    }

    fn schedule_reconnect(&mut self, delay: std::time::Duration) {
        if self.reconnect.record_failure(&self.settings.reconnect) {
            info!(
                delay_ms = delay.as_millis(),
                attempt = self.reconnect.attempts(),
                "Scheduling reconnect"
            );
            self.phase = Phase::Backoff;
            self.reconnect_at = Some(Instant::now() + delay);
        } else {
            let attempts = self.reconnect.attempts().saturating_sub(1);
            error!(attempts, "Giving up on reconnecting to Figma relay");
            self.phase = Phase::Exhausted { attempts };
            self.reconnect_at = None;
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down Figma bridge");
        if let Some(handle) = self.connecting.take() {
            handle.abort();
        }
        if let Some(mut ws) = self.socket.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "Error while closing socket");
            }
        }
        self.session.fail_all(&BridgeError::Stopped);
        self.fail_deferred(&BridgeError::Stopped);
    }
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => pending().await,
    }
}

async fn finish_connect(task: &mut Option<JoinHandle<ConnectResult>>) -> ConnectResult {
    let Some(handle) = task.as_mut() else {
        return pending().await;
    };
    let result = handle.await;
    *task = None;
    result.unwrap_or_else(|e| Err(format!("connection task failed: {e}")))
}

async fn await_default_join(join: &mut Option<oneshot::Receiver<Outcome>>) -> Outcome {
    let Some(rx) = join.as_mut() else {
        return pending().await;
    };
    let outcome = rx.await;
    *join = None;
    outcome.unwrap_or(Err(BridgeError::Stopped))
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
