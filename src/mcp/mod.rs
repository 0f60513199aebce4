//! Model Context Protocol (MCP) server implementation.
//!
//! Exposes Figma editing commands as MCP tools. The server speaks JSON-RPC
//! 2.0 over stdio and forwards every tool call through the bridge.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MCP Server                          │
//! │                                                             │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │   │  Transport  │───▶│   Server    │───▶│    Tools    │     │
//! │   │   (stdio)   │    │ (lifecycle) │    │  (catalog)  │     │
//! │   └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                                │            │
//! └────────────────────────────────────────────────┼────────────┘
//!                                                  ▼
//!                                           FigmaBridge (WebSocket)
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::{Incoming, RequestId, Response, MCP_PROTOCOL_VERSION};
pub use server::McpServer;
pub use transport::StdioTransport;
