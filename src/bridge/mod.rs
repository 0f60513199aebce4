//! WebSocket bridge to the Figma plugin.
//!
//! Commands travel to the plugin through a relay server; replies come back
//! on the same socket, in any order and in several shapes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  BridgeCommand   ┌─────────────────────────────────────┐
//! │ FigmaBridge  │─────────────────▶│           ConnectionTask            │
//! │  (dispatch)  │◀─────────────────│                                     │
//! └──────────────┘  oneshot reply   │  ┌─────────┐   ┌────────────────┐   │
//!                                   │  │ Session │──▶│ PendingRegistry│   │
//!                                   │  └────┬────┘   └────────────────┘   │
//!                                   │       │ correlator / timeouts       │
//!                                   │       ▼                             │
//!                                   │  WebSocket (reconnect + backoff)    │
//!                                   └─────────────────────────────────────┘
//! ```
//!
//! - [`envelope`]: outbound envelopes and loosely typed inbound messages
//! - [`registry`]: requests in flight
//! - [`correlator`]: ordered reply-matching rules
//! - [`timeout`]: per-request deadline state machine
//! - [`channel`]: channel membership gate
//! - [`backoff`]: reconnection delays
//! - [`session`]: the synchronous core tying the above together
//! - [`connection`]: the task owning the socket
//! - [`dispatch`]: the public handle

pub mod backoff;
pub mod channel;
pub mod connection;
pub mod correlator;
pub mod dispatch;
pub mod envelope;
pub mod registry;
pub mod session;
pub mod timeout;

pub use backoff::ReconnectPolicy;
pub use dispatch::{BridgeSettings, FigmaBridge};
pub use timeout::TimeoutPolicy;
