//! Tunnel configuration.
//!
//! Options are plain structs built before the tunnel is created. Unset
//! fields fall back to the defaults documented on each field.
//!
//! # Example
//!
//! ```
//! use device_tunnel::tunnel::TunnelOptions;
//!
//! let options = TunnelOptions::new().with_local_port(8282);
//! assert_eq!(options.local_port, Some(8282));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tracing::Span;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address for local listeners (localhost).
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Ping interval of the multiplexed tunnel.
pub const MULTIPLEXED_HEARTBEAT: Duration = Duration::from_secs(10);

/// Ping interval of the single-stream tunnel.
pub const STREAM_HEARTBEAT: Duration = Duration::from_secs(30);

/// Default adb executable, resolved through `PATH`.
pub const DEFAULT_ADB_PATH: &str = "adb";

// ============================================================================
// TunnelOptions
// ============================================================================

/// Options for [`MultiplexedTunnel`](super::MultiplexedTunnel).
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// Local port to listen on. `None` asks the OS for an ephemeral port.
    pub local_port: Option<u16>,

    /// Local address to listen on.
    pub bind_ip: IpAddr,

    /// Interval between WebSocket pings.
    pub heartbeat_interval: Duration,

    /// Parent span for all diagnostics of this tunnel.
    pub span: Option<Span>,
}

impl TunnelOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            local_port: None,
            bind_ip: DEFAULT_BIND_IP,
            heartbeat_interval: MULTIPLEXED_HEARTBEAT,
            span: None,
        }
    }

    /// Listens on a fixed local port.
    #[inline]
    #[must_use]
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Listens on a different local address.
    #[inline]
    #[must_use]
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Overrides the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Emits diagnostics under `span`.
    #[inline]
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Address the listener binds.
    #[inline]
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.local_port.unwrap_or(0))
    }
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// StreamTunnelOptions
// ============================================================================

/// Options for [`StreamTunnel`](super::StreamTunnel).
#[derive(Debug, Clone)]
pub struct StreamTunnelOptions {
    /// Local port to listen on. `None` asks the OS for an ephemeral port.
    pub local_port: Option<u16>,

    /// Local address to listen on.
    pub bind_ip: IpAddr,

    /// Interval between WebSocket pings. A failed ping tears the tunnel down.
    pub heartbeat_interval: Duration,

    /// Parent span for all diagnostics of this tunnel.
    pub span: Option<Span>,
}

impl StreamTunnelOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            local_port: None,
            bind_ip: DEFAULT_BIND_IP,
            heartbeat_interval: STREAM_HEARTBEAT,
            span: None,
        }
    }

    /// Listens on a fixed local port.
    #[inline]
    #[must_use]
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Overrides the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Emits diagnostics under `span`.
    #[inline]
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Address the listener binds.
    #[inline]
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.local_port.unwrap_or(0))
    }
}

impl Default for StreamTunnelOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// AdbOptions
// ============================================================================

/// Options for [`AdbTunnel`](super::AdbTunnel).
#[derive(Debug, Clone)]
pub struct AdbOptions {
    /// Path to the adb executable.
    pub adb_path: PathBuf,

    /// Options of the underlying single-stream tunnel.
    pub tunnel: StreamTunnelOptions,
}

impl AdbOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            adb_path: PathBuf::from(DEFAULT_ADB_PATH),
            tunnel: StreamTunnelOptions::new(),
        }
    }

    /// Uses a custom adb executable.
    #[inline]
    #[must_use]
    pub fn with_adb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.adb_path = path.into();
        self
    }

    /// Overrides the underlying tunnel options.
    #[inline]
    #[must_use]
    pub fn with_tunnel(mut self, tunnel: StreamTunnelOptions) -> Self {
        self.tunnel = tunnel;
        self
    }
}

impl Default for AdbOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
