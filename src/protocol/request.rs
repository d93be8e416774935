//! Request and Response message types.
//!
//! Requests and responses travel as JSON text messages over the signaling
//! WebSocket and are correlated by their `id`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Command;

// ============================================================================
// Constants
// ============================================================================

/// Response `type` of streaming command output.
pub const SIMCTL_STREAM: &str = "simctlStream";

// ============================================================================
// Request
// ============================================================================

/// A command request from the client to the device.
///
/// # Format
///
/// ```json
/// { "type": "tap", "id": "rs-1700000000000000000-1", "x": 10.0, "y": 20.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation ID, echoed by the server.
    pub id: RequestId,

    /// Command with its `type` tag and fields.
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Creates a request with the given ID.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, command: Command) -> Self {
        Self { id, command }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A message from the device.
///
/// Only `type` and `id` are always present; the other fields depend on the
/// request type.
///
/// # Format
///
/// ```json
/// { "type": "screenshot", "id": "rs-...-1", "base64": "...", "width": 390, "height": 844 }
/// { "type": "tap", "id": "rs-...-2", "error": "out of bounds" }
/// { "type": "simctlStream", "id": "rs-...-3", "stdout": "aGk=", "exitCode": 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Message type.
    #[serde(rename = "type", default)]
    pub response_type: String,

    /// ID of the request this answers.
    pub id: RequestId,

    /// Server-reported failure.
    #[serde(default)]
    pub error: Option<String>,

    /// Base64 JPEG of a screenshot.
    #[serde(default)]
    pub base64: Option<String>,

    /// Screenshot width in points.
    #[serde(default)]
    pub width: Option<f64>,

    /// Screenshot height in points.
    #[serde(default)]
    pub height: Option<f64>,

    /// Accessibility tree as a JSON string.
    #[serde(default)]
    pub json: Option<String>,

    /// Label of the element acted on.
    #[serde(default)]
    pub element_label: Option<String>,

    /// Type of the element acted on.
    #[serde(default)]
    pub element_type: Option<String>,

    /// Installed apps as a JSON-encoded string.
    #[serde(default)]
    pub apps: Option<String>,

    /// Open files as a JSON array.
    #[serde(default)]
    pub files: Option<Value>,

    /// URL an app was installed from.
    #[serde(default)]
    pub url: Option<String>,

    /// Bundle ID of an installed app.
    #[serde(default)]
    pub bundle_id: Option<String>,

    /// Base64 stdout chunk of a streaming command.
    #[serde(default)]
    pub stdout: Option<String>,

    /// Base64 stderr chunk of a streaming command.
    #[serde(default)]
    pub stderr: Option<String>,

    /// Exit code; present only on the final streaming message.
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl Response {
    /// Returns `true` if this is streaming command output.
    #[inline]
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.response_type == SIMCTL_STREAM
    }

    /// Returns the server error, if a non-empty one is present.
    #[inline]
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Converts a response carrying an `error` into [`Error::Remote`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the server reported an error.
    pub fn into_result(self) -> Result<Self> {
        match self.error_message() {
            Some(message) => Err(Error::remote(message)),
            None => Ok(self),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
