//! MCP server exposing the Figma tool catalog.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Handling tool calls and other requests
//! 3. **Shutdown**: On stdin EOF or SIGINT/SIGTERM
//!
//! Tool calls are forwarded to Figma and may take minutes. Each runs as its
//! own task; its response is written when it finishes, so a slow export does
//! not hold up a quick selection query.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::bridge::FigmaBridge;
use crate::mcp::protocol::{
    ErrorCode, Incoming, Notification, Request, RequestId, Response, MCP_PROTOCOL_VERSION,
    SERVER_NAME,
};
use crate::mcp::tools::{self, ToolCallResult};
use crate::mcp::transport::StdioTransport;

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server information for the initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: &'static str,
    /// Server version.
    pub version: &'static str,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<Value>,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// What the main loop should do after handling a line.
enum Step {
    Reply(Response),
    Spawned,
    Nothing,
}

/// The MCP server.
pub struct McpServer {
    state: ServerState,
    transport: StdioTransport,
    bridge: FigmaBridge,
    calls: JoinSet<Response>,
    call_ids: HashMap<task::Id, RequestId>,
}

impl McpServer {
    /// Creates a server forwarding tool calls through `bridge`.
    #[must_use]
    pub fn new(bridge: FigmaBridge) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            transport: StdioTransport::new(),
            bridge,
            calls: JoinSet::new(),
            call_ids: HashMap::new(),
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Runs the server until stdin closes or a shutdown signal arrives.
    ///
    /// Tool calls still in flight at that point are abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let result = self.run_with_shutdown().await;
        self.state = ServerState::ShuttingDown;
        if !self.calls.is_empty() {
            info!(in_flight = self.calls.len(), "Abandoning unfinished tool calls");
        }
        self.calls.abort_all();
        self.call_ids.clear();
        result
    }

    #[cfg(unix)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(std::io::Error::other)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(std::io::Error::other)?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                    return Ok(());
                }

                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    return Ok(());
                }

                Some(joined) = self.calls.join_next_with_id(), if !self.calls.is_empty() => {
                    self.write_finished_call(joined).await?;
                }

                line = self.transport.read_line() => {
                    if self.handle_transport_result(line).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    #[cfg(windows)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                    return Ok(());
                }

                Some(joined) = self.calls.join_next_with_id(), if !self.calls.is_empty() => {
                    self.write_finished_call(joined).await?;
                }

                line = self.transport.read_line() => {
                    if self.handle_transport_result(line).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn write_finished_call(
        &mut self,
        joined: Result<(task::Id, Response), JoinError>,
    ) -> std::io::Result<()> {
        match self.finished_call(joined) {
            Some(response) => self.transport.write(&response).await,
            None => Ok(()),
        }
    }

    /// Response for a finished tool call task. A task that panicked still
    /// gets an internal error so the client is not left waiting.
    fn finished_call(
        &mut self,
        joined: Result<(task::Id, Response), JoinError>,
    ) -> Option<Response> {
        match joined {
            Ok((task_id, response)) => {
                self.call_ids.remove(&task_id);
                Some(response)
            }
            Err(e) => {
                error!(error = %e, "Tool call task failed");
                let id = self.call_ids.remove(&e.id())?;
                Some(Response::error(
                    Some(id),
                    ErrorCode::InternalError,
                    "Internal error: tool call did not complete",
                ))
            }
        }
    }

    /// Handles the result from transport read.
    ///
    /// Returns `true` if the server should shut down.
    async fn handle_transport_result(
        &mut self,
        line: std::io::Result<Option<String>>,
    ) -> std::io::Result<bool> {
        let Some(line) = line? else {
            info!("stdin closed");
            return Ok(true);
        };

        if line.trim().is_empty() {
            return Ok(false);
        }

        match self.handle_line(&line) {
            Step::Reply(response) => self.transport.write(&response).await?,
            Step::Spawned | Step::Nothing => {}
        }

        Ok(false)
    }

    fn handle_line(&mut self, line: &str) -> Step {
        match Incoming::parse(line) {
            Ok(Incoming::Request(req)) => self.handle_request(&req),
            Ok(Incoming::Notification(notif)) => {
                self.handle_notification(&notif);
                Step::Nothing
            }
            Err(response) => {
                warn!("Rejected malformed client message");
                Step::Reply(response)
            }
        }
    }

    fn handle_request(&mut self, req: &Request) -> Step {
        debug!(method = %req.method, id = %req.id, "Request");
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "tools/list" => self.handle_tools_list(req),
            "tools/call" => return self.handle_tools_call(req),
            "ping" => Ok(Response::success(req.id.clone(), json!({}))),
            _ => Err(Response::method_not_found(req.id.clone(), &req.method)),
        };
        Step::Reply(response.unwrap_or_else(|e| e))
    }

    fn handle_notification(&mut self, notif: &Notification) {
        if notif.method == "notifications/initialized" && self.state == ServerState::Initialising {
            info!("Client initialised");
            self.state = ServerState::Running;
        } else {
            debug!(method = %notif.method, "Ignoring notification");
        }
    }

    fn handle_initialize(&mut self, req: &Request) -> Result<Response, Response> {
        if self.state != ServerState::AwaitingInit {
            return Err(Response::error(
                Some(req.id.clone()),
                ErrorCode::InvalidRequest,
                "Server already initialised",
            ));
        }

        let params: InitializeParams = req.params_as()?;
        info!(
            requested_version = %params.protocol_version,
            client = ?params.client_info,
            "Initialising"
        );

        self.state = ServerState::Initialising;

        Ok(Response::success(
            req.id.clone(),
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": ServerInfo::default(),
            }),
        ))
    }

    fn handle_tools_list(&self, req: &Request) -> Result<Response, Response> {
        self.require_running(&req.id)?;
        let tools: Vec<_> = tools::catalog().iter().map(tools::ToolSpec::definition).collect();
        Ok(Response::success(req.id.clone(), json!({ "tools": tools })))
    }

    fn handle_tools_call(&mut self, req: &Request) -> Step {
        if let Err(response) = self.require_running(&req.id) {
            return Step::Reply(response);
        }
        let params: ToolCallParams = match req.params_as() {
            Ok(params) => params,
            Err(response) => return Step::Reply(response),
        };

        let id = req.id.clone();
        let (spec, arguments) = match tools::prepare(&params.name, params.arguments) {
            Ok(prepared) => prepared,
            Err(result) => return Step::Reply(tool_response(id, &result)),
        };

        let bridge = self.bridge.clone();
        let reply_id = id.clone();
        let handle = self.calls.spawn(async move {
            let result = spec.invoke(&bridge, arguments).await;
            tool_response(reply_id, &result)
        });
        self.call_ids.insert(handle.id(), id);
        Step::Spawned
    }

    /// Ensures the server is in the Running state.
    fn require_running(&self, id: &RequestId) -> Result<(), Response> {
        if self.state != ServerState::Running {
            return Err(Response::error(
                Some(id.clone()),
                ErrorCode::InvalidRequest,
                "Server not initialised",
            ));
        }
        Ok(())
    }
}

fn tool_response(id: RequestId, result: &ToolCallResult) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::success(id, value),
        Err(e) => {
            error!(error = %e, "Failed to serialise tool call result");
            Response::error(
                Some(id),
                ErrorCode::InternalError,
                "Internal error: failed to serialise result",
            )
        }
    }
}
