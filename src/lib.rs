//! figma-mcp-bridge: MCP server that drives the Figma editor
//!
//! This library exposes Figma editing commands as MCP tools. Tool calls are
//! forwarded over a WebSocket relay to a Figma plugin, which performs them
//! and replies.
//!
//! # Architecture
//!
//! The MCP server is a thin layer; the interesting part is the bridge:
//!
//! - **Dispatch**: one handle through which every command is sent
//! - **Correlation**: matching replies of inconsistent shape to requests
//! - **Resilience**: progressive timeouts, reconnection with backoff
//!
//! The plugin (not this tool) performs the actual document changes.
//!
//! # Modules
//!
//! - [`bridge`]: WebSocket transport and request correlation
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation and tool catalog

pub mod bridge;
pub mod config;
pub mod error;
pub mod mcp;
