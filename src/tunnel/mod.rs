//! Local TCP tunnels to remote device instances.
//!
//! | Type | Local connections | Framing |
//! |------|-------------------|---------|
//! | [`MultiplexedTunnel`] | any number | `[connection ID][payload]` |
//! | [`StreamTunnel`] | exactly one | none |
//! | [`AdbTunnel`] | exactly one, handed to adb | none |
//!
//! All tunnels authenticate with `Authorization: Bearer <token>` and own
//! their WebSocket for their whole lifetime. Dropping the WebSocket tears
//! down every local connection; there is no reconnect at this layer.

// ============================================================================
// Submodules
// ============================================================================

/// adb registration on top of the single-stream tunnel.
pub mod adb;

/// Connection-ID multiplexed tunnel.
pub mod multiplexed;

/// Tunnel configuration.
pub mod options;

/// Single-stream tunnel.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use adb::AdbTunnel;
pub use multiplexed::MultiplexedTunnel;
pub use options::{AdbOptions, StreamTunnelOptions, TunnelOptions};
pub use stream::StreamTunnel;
