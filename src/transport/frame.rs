//! Binary frame codec for the byte-stream multiplexer.
//!
//! # Format
//!
//! ```text
//! byte 0..3:  connection ID, big-endian u32
//! byte 4..N:  payload bytes (possibly empty)
//! ```
//!
//! An empty payload is the close signal for that connection ID, so a
//! zero-length application write cannot be represented on the wire.

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::Bytes;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

// ============================================================================
// Constants
// ============================================================================

/// Length of the connection ID prefix.
pub const HEADER_LEN: usize = 4;

// ============================================================================
// Frame
// ============================================================================

/// One `[connection ID][payload]` unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Session the payload belongs to.
    pub connection_id: ConnectionId,
    /// Opaque payload; empty means close.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a data frame.
    #[inline]
    #[must_use]
    pub fn new(connection_id: ConnectionId, payload: impl Into<Bytes>) -> Self {
        Self {
            connection_id,
            payload: payload.into(),
        }
    }

    /// Creates a close frame (empty payload).
    #[inline]
    #[must_use]
    pub fn close(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            payload: Bytes::new(),
        }
    }

    /// Returns `true` if this frame signals close.
    #[inline]
    #[must_use]
    pub fn is_close(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encodes the frame into its wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self.connection_id, &self.payload)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Prepends the big-endian connection ID to `payload`.
#[must_use]
pub fn encode(connection_id: ConnectionId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&connection_id.as_u32().to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Splits a wire message into connection ID and payload without copying.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the message is shorter than 4 bytes.
pub fn decode(message: Bytes) -> Result<Frame> {
    if message.len() < HEADER_LEN {
        return Err(Error::protocol(format!(
            "frame too short: {} bytes",
            message.len()
        )));
    }

    let raw = u32::from_be_bytes([message[0], message[1], message[2], message[3]]);

    Ok(Frame {
        connection_id: ConnectionId::new(raw),
        payload: message.slice(HEADER_LEN..),
    })
}

// ============================================================================
// Tests
// ============================================================================
