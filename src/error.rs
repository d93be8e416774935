//! Error types for device tunnels and the device RPC client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use device_tunnel::{Result, ios::Client};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     client.tap(120.0, 300.0).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Setup | [`Error::Config`], [`Error::Bind`], [`Error::Connection`] |
//! | Transport | [`Error::ConnectionClosed`], [`Error::NotConnected`], [`Error::WebSocket`], [`Error::Io`] |
//! | Protocol | [`Error::Protocol`], [`Error::Json`] |
//! | Application | [`Error::Remote`], [`Error::CommandExit`], [`Error::CommandState`], [`Error::AdbConnect`] |
//! | Cancellation | [`Error::Cancelled`], [`Error::RequestTimeout`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::net::SocketAddr;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned for malformed URLs, invalid tokens and bad options.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Local listener could not be bound.
    #[error("Failed to bind local listener on {addr}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: IoError,
    },

    /// WebSocket connection failed.
    ///
    /// Returned when the remote endpoint cannot be dialed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The duplex connection was closed while the operation was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The operation was attempted on a component that is already closed.
    #[error("Not connected")]
    NotConnected,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or undecodable message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Application Errors
    // ========================================================================
    /// The server answered the request with an `error` field.
    #[error("Remote error: {message}")]
    Remote {
        /// Error string reported by the server.
        message: String,
    },

    /// A streaming command finished with a non-zero exit code.
    #[error("Command exited with code {code}")]
    CommandExit {
        /// Exit code reported by the remote side.
        code: i32,
        /// Output captured by [`Simctl::output`](crate::ios::Simctl::output)
        /// or [`Simctl::combined_output`](crate::ios::Simctl::combined_output);
        /// empty otherwise.
        output: Vec<u8>,
    },

    /// A streaming command was used in the wrong state.
    #[error("Command state error: {message}")]
    CommandState {
        /// Description of the misuse.
        message: String,
    },

    /// Registering the local endpoint with adb failed.
    #[error("adb connect failed: {message}")]
    AdbConnect {
        /// Error and combined output of the adb invocation.
        message: String,
    },

    // ========================================================================
    // Cancellation Errors
    // ========================================================================
    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// No response arrived within the request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    #[inline]
    pub fn bind(addr: SocketAddr, source: IoError) -> Self {
        Self::Bind { addr, source }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a remote (server-reported) error.
    #[inline]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Creates a command state error.
    #[inline]
    pub fn command_state(message: impl Into<String>) -> Self {
        Self::CommandState {
            message: message.into(),
        }
    }

    /// Creates an adb handoff error.
    #[inline]
    pub fn adb_connect(message: impl Into<String>) -> Self {
        Self::AdbConnect {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout or cancellation.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the error was produced by the remote application
    /// rather than by the transport.
    #[inline]
    #[must_use]
    pub fn is_application_error(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. }
                | Self::CommandExit { .. }
                | Self::CommandState { .. }
                | Self::AdbConnect { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
