//! WebSocket transport layer.
//!
//! This module holds the pieces shared by every multiplexing component:
//! the binary frame codec, WebSocket dialing with a serialized write half,
//! and the keepalive heartbeat.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐                         ┌──────────────────┐
//! │  Tunnel / Client      │                         │  Device instance │
//! │                       │        WebSocket        │                  │
//! │  SharedSink (writers) │────────────────────────►│                  │
//! │  WsReader (one loop)  │◄────────────────────────│                  │
//! └───────────────────────┘                         └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | `[connection ID][payload]` codec |
//! | `socket` | Dialing, `SharedSink`, `WsReader` |
//! | `heartbeat` | Periodic ping loop |

// ============================================================================
// Submodules
// ============================================================================

/// Binary frame codec for the byte multiplexer.
pub mod frame;

/// Keepalive ping loop.
pub mod heartbeat;

/// WebSocket dialing and the shared write half.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, decode, encode};
pub use heartbeat::PingFailure;
pub use socket::{SharedSink, WsReader, WsStream, dial, split};
