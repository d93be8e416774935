//! Results and options of device actions.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

pub use crate::protocol::command::{
    AccessibilityPoint, AccessibilitySelector, LaunchMode, Orientation,
};

// ============================================================================
// Action Results
// ============================================================================

/// A captured screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotData {
    /// Base64-encoded JPEG.
    pub base64: String,
    /// Width in points.
    pub width: f64,
    /// Height in points.
    pub height: f64,
}

/// The element hit by [`Client::tap_element`](super::Client::tap_element).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapElementResult {
    /// Label of the tapped element.
    pub element_label: String,
    /// Type of the tapped element.
    pub element_type: String,
}

/// The element changed by an element action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementResult {
    /// Label of the element.
    pub element_label: String,
}

/// An installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    /// Bundle identifier.
    pub bundle_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// `System` or `User`.
    #[serde(default)]
    pub install_type: String,
}

/// An open file on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsofEntry {
    /// File kind, e.g. `unix`.
    pub kind: String,
    /// Path of the file or socket.
    pub path: String,
}

/// A successful installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInstallationResult {
    /// URL the app was installed from.
    pub url: String,
    /// Bundle ID of the installed app.
    pub bundle_id: String,
}

// ============================================================================
// AppInstallationOptions
// ============================================================================

/// Options for [`Client::install_app`](super::Client::install_app).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInstallationOptions {
    /// Skip the download when the cached file has this MD5.
    pub md5: Option<String>,
    /// Launch after installation; `None` leaves the app closed.
    pub launch_mode: Option<LaunchMode>,
}

impl AppInstallationOptions {
    /// Creates empty options.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            md5: None,
            launch_mode: None,
        }
    }

    /// Sets the expected MD5 of the download.
    #[must_use]
    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    /// Sets the launch mode.
    #[must_use]
    pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
        self.launch_mode = Some(mode);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
