//! Device Tunnel - Local TCP tunnels and a device RPC client over WebSocket.
//!
//! This library connects local tools to remote Android and iOS instances
//! through a single WebSocket per purpose.
//!
//! # Architecture
//!
//! - **Tunnels**: local TCP listeners whose connections are carried over
//!   one WebSocket, either multiplexed by connection ID or as one raw stream
//! - **Device client**: JSON requests correlated to responses by ID, plus
//!   long-running `simctl` commands whose output streams back
//!
//! Key design principles:
//!
//! - One read loop per WebSocket; every write goes through one write lock
//! - Registries are scoped to one connection and emptied on teardown
//! - Connection loss fails every dependent exactly once
//! - Cancellation is cooperative via [`CancellationToken`](tokio_util::sync::CancellationToken)
//!
//! # Quick Start
//!
//! ```no_run
//! use device_tunnel::tunnel::{MultiplexedTunnel, TunnelOptions};
//! use device_tunnel::ios::{Client, ClientOptions};
//! use device_tunnel::Result;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Expose port 8100 of the instance on a local port
//!     let remote = Url::parse("wss://instance.example.com/port-forward").unwrap();
//!     let tunnel = MultiplexedTunnel::new(&remote, 8100, "token", TunnelOptions::new()).await?;
//!     tunnel.start()?;
//!     println!("Forwarding {}", tunnel.addr());
//!
//!     // Drive the simulator
//!     let client = Client::connect("https://instance.example.com", "token", ClientOptions::new()).await?;
//!     client.tap(100.0, 200.0).await?;
//!     let apps = client.simctl(["listapps", "booted"]).output().await?;
//!     println!("{}", String::from_utf8_lossy(&apps));
//!
//!     client.close().await?;
//!     tunnel.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection and request IDs |
//! | [`ios`] | iOS client: actions and streaming commands |
//! | [`protocol`] | JSON request/response types |
//! | [`transport`] | Frame codec, WebSocket plumbing, heartbeat |
//! | [`tunnel`] | Multiplexed, single-stream and adb tunnels |
//!
//! # TLS
//!
//! `wss://` URLs use rustls with the webpki root store. Applications that
//! link more than one rustls crypto provider must install a default one
//! before connecting.

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers keep connection IDs and request IDs apart.
pub mod identifiers;

/// iOS device client.
///
/// - [`Client`](ios::Client) - request correlation and typed actions
/// - [`Simctl`](ios::Simctl) - streaming `simctl` invocations
pub mod ios;

/// JSON protocol message types.
pub mod protocol;

/// WebSocket transport layer.
///
/// Frame codec, dialing, the shared write half and the heartbeat loop.
pub mod transport;

/// Local TCP tunnels.
///
/// - [`MultiplexedTunnel`](tunnel::MultiplexedTunnel) - many connections, one WebSocket
/// - [`StreamTunnel`](tunnel::StreamTunnel) - one connection, raw bytes
/// - [`AdbTunnel`](tunnel::AdbTunnel) - single stream registered with adb
pub mod tunnel;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, RequestId};

// Tunnel types
pub use tunnel::{
    AdbOptions, AdbTunnel, MultiplexedTunnel, StreamTunnel, StreamTunnelOptions, TunnelOptions,
};

// Device client types
pub use ios::{Client, ClientOptions, OutputBuffer, OutputPipe, Simctl};
