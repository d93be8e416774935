//! Device commands and the value types they carry.
//!
//! Each variant serializes to a JSON object tagged by `type`, e.g.
//! `{"type":"tap","x":10.0,"y":20.0}`. The request ID is added by
//! [`Request`](super::Request).
//!
//! # Commands
//!
//! | Group | Types |
//! |-------|-------|
//! | Screen | `screenshot`, `elementTree`, `setOrientation` |
//! | Input | `tap`, `tapElement`, `typeText`, `pressKey` |
//! | Elements | `incrementElement`, `decrementElement`, `setElementValue` |
//! | Apps | `launchApp`, `listApps`, `openUrl`, `appInstallation` |
//! | System | `listOpenFiles`, `simctl`, `simctlTerminate` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// Command
// ============================================================================

/// A request body understood by the device's signaling endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Capture the current screen as JPEG.
    #[serde(rename = "screenshot")]
    Screenshot,

    /// Dump the accessibility hierarchy, optionally only around a point.
    #[serde(rename = "elementTree")]
    ElementTree {
        /// Restrict the tree to the element at this point.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        point: Option<AccessibilityPoint>,
    },

    /// Tap at screen coordinates.
    #[serde(rename = "tap")]
    Tap {
        /// X coordinate in points.
        x: f64,
        /// Y coordinate in points.
        y: f64,
    },

    /// Tap the element matching a selector.
    #[serde(rename = "tapElement")]
    TapElement {
        /// Element to tap.
        selector: AccessibilitySelector,
    },

    /// Increment a slider or stepper.
    #[serde(rename = "incrementElement")]
    IncrementElement {
        /// Element to increment.
        selector: AccessibilitySelector,
    },

    /// Decrement a slider or stepper.
    #[serde(rename = "decrementElement")]
    DecrementElement {
        /// Element to decrement.
        selector: AccessibilitySelector,
    },

    /// Replace an element's value.
    #[serde(rename = "setElementValue")]
    SetElementValue {
        /// New value.
        text: String,
        /// Element to modify.
        selector: AccessibilitySelector,
    },

    /// Type into the focused field.
    #[serde(rename = "typeText")]
    TypeText {
        /// Text to type.
        text: String,
        /// Press return after typing.
        #[serde(rename = "pressEnter", default, skip_serializing_if = "is_false")]
        press_enter: bool,
    },

    /// Press a key with optional modifiers.
    #[serde(rename = "pressKey")]
    PressKey {
        /// Key name.
        key: String,
        /// Modifier names such as `shift` or `command`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        modifiers: Vec<String>,
    },

    /// Launch an installed app.
    #[serde(rename = "launchApp")]
    LaunchApp {
        /// Bundle identifier.
        #[serde(rename = "bundleId")]
        bundle_id: String,
    },

    /// List installed apps.
    #[serde(rename = "listApps")]
    ListApps,

    /// Open a URL on the device.
    #[serde(rename = "openUrl")]
    OpenUrl {
        /// URL to open.
        url: String,
    },

    /// Install an app from a URL.
    #[serde(rename = "appInstallation")]
    AppInstallation {
        /// Location of the `.ipa` or `.app` (optionally zipped).
        url: String,
        /// Skip the download when the cached file has this MD5.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        md5: Option<String>,
        /// Launch behaviour after installation.
        #[serde(rename = "launchMode", default, skip_serializing_if = "Option::is_none")]
        launch_mode: Option<LaunchMode>,
    },

    /// List open files of a kind (`unix` sockets).
    #[serde(rename = "listOpenFiles")]
    ListOpenFiles {
        /// File kind filter.
        kind: String,
    },

    /// Rotate the device.
    #[serde(rename = "setOrientation")]
    SetOrientation {
        /// Target orientation.
        orientation: Orientation,
    },

    /// Start a streaming `simctl` invocation.
    #[serde(rename = "simctl")]
    Simctl {
        /// Arguments after `simctl`.
        args: Vec<String>,
    },

    /// Terminate a running `simctl` invocation (same ID as the start).
    #[serde(rename = "simctlTerminate")]
    SimctlTerminate,
}

impl Command {
    /// Returns the wire `type` of this command.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::ElementTree { .. } => "elementTree",
            Self::Tap { .. } => "tap",
            Self::TapElement { .. } => "tapElement",
            Self::IncrementElement { .. } => "incrementElement",
            Self::DecrementElement { .. } => "decrementElement",
            Self::SetElementValue { .. } => "setElementValue",
            Self::TypeText { .. } => "typeText",
            Self::PressKey { .. } => "pressKey",
            Self::LaunchApp { .. } => "launchApp",
            Self::ListApps => "listApps",
            Self::OpenUrl { .. } => "openUrl",
            Self::AppInstallation { .. } => "appInstallation",
            Self::ListOpenFiles { .. } => "listOpenFiles",
            Self::SetOrientation { .. } => "setOrientation",
            Self::Simctl { .. } => "simctl",
            Self::SimctlTerminate => "simctlTerminate",
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ============================================================================
// Value Types
// ============================================================================

/// Criteria for finding an accessibility element.
///
/// All non-empty fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilitySelector {
    /// Exact accessibility identifier.
    #[serde(rename = "accessibilityId", default, skip_serializing_if = "Option::is_none")]
    pub accessibility_id: Option<String>,
    /// Exact label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Label substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_contains: Option<String>,
    /// Element type such as `Button`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    /// Exact title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Title substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<String>,
    /// Exact value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl AccessibilitySelector {
    /// Selects by accessibility identifier.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            accessibility_id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Selects by exact label.
    #[must_use]
    pub fn by_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }
}

/// A point on the screen, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityPoint {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

/// What to do with an app after installing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchMode {
    /// Bring to foreground if running, otherwise launch.
    ForegroundIfRunning,
    /// Kill and relaunch if running.
    RelaunchIfRunning,
    /// Fail if already running.
    FailIfRunning,
}

/// Device orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    /// Portrait mode.
    Portrait,
    /// Landscape mode.
    Landscape,
}

// ============================================================================
// Tests
// ============================================================================
