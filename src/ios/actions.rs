//! Typed device actions.
//!
//! Each action is one request/response round trip through
//! [`Client::send`]; the client-wide timeout applies.
//!
//! | Action | Request type | Result |
//! |--------|--------------|--------|
//! | [`screenshot`](Client::screenshot) | `screenshot` | [`ScreenshotData`] |
//! | [`element_tree`](Client::element_tree) | `elementTree` | JSON string |
//! | [`tap`](Client::tap) | `tap` | - |
//! | [`tap_element`](Client::tap_element) | `tapElement` | [`TapElementResult`] |
//! | [`increment_element`](Client::increment_element) | `incrementElement` | [`ElementResult`] |
//! | [`decrement_element`](Client::decrement_element) | `decrementElement` | [`ElementResult`] |
//! | [`set_element_value`](Client::set_element_value) | `setElementValue` | [`ElementResult`] |
//! | [`type_text`](Client::type_text) | `typeText` | - |
//! | [`press_key`](Client::press_key) | `pressKey` | - |
//! | [`launch_app`](Client::launch_app) | `launchApp` | - |
//! | [`list_apps`](Client::list_apps) | `listApps` | `Vec<`[`InstalledApp`]`>` |
//! | [`open_url`](Client::open_url) | `openUrl` | - |
//! | [`install_app`](Client::install_app) | `appInstallation` | [`AppInstallationResult`] |
//! | [`lsof`](Client::lsof) | `listOpenFiles` | `Vec<`[`LsofEntry`]`>` |
//! | [`set_orientation`](Client::set_orientation) | `setOrientation` | - |

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::Result;
use crate::protocol::Command;

use super::client::Client;
use super::types::{
    AccessibilityPoint, AccessibilitySelector, AppInstallationOptions, AppInstallationResult,
    ElementResult, InstalledApp, LsofEntry, Orientation, ScreenshotData, TapElementResult,
};

// ============================================================================
// Screen
// ============================================================================

impl Client {
    /// Captures the screen as a base64 JPEG.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn screenshot(&self) -> Result<ScreenshotData> {
        let response = self.send(Command::Screenshot).await?;
        Ok(ScreenshotData {
            base64: response.base64.unwrap_or_default(),
            width: response.width.unwrap_or_default(),
            height: response.height.unwrap_or_default(),
        })
    }

    /// Returns the accessibility hierarchy as JSON, optionally only for
    /// the element at `point`.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn element_tree(&self, point: Option<AccessibilityPoint>) -> Result<String> {
        let response = self.send(Command::ElementTree { point }).await?;
        Ok(response.json.unwrap_or_default())
    }

    /// Rotates the device.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn set_orientation(&self, orientation: Orientation) -> Result<()> {
        self.send(Command::SetOrientation { orientation }).await?;
        Ok(())
    }
}

// ============================================================================
// Input
// ============================================================================

impl Client {
    /// Taps at screen coordinates.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn tap(&self, x: f64, y: f64) -> Result<()> {
        self.send(Command::Tap { x, y }).await?;
        Ok(())
    }

    /// Taps the element matching `selector`.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`]; a missing element is a
    /// [`Error::Remote`](crate::Error::Remote).
    pub async fn tap_element(&self, selector: AccessibilitySelector) -> Result<TapElementResult> {
        let response = self.send(Command::TapElement { selector }).await?;
        Ok(TapElementResult {
            element_label: response.element_label.unwrap_or_default(),
            element_type: response.element_type.unwrap_or_default(),
        })
    }

    /// Types into the focused field, optionally pressing return.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn type_text(&self, text: impl Into<String>, press_enter: bool) -> Result<()> {
        self.send(Command::TypeText {
            text: text.into(),
            press_enter,
        })
        .await?;
        Ok(())
    }

    /// Presses `key` with the given modifiers.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn press_key<I, S>(&self, key: impl Into<String>, modifiers: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(Command::PressKey {
            key: key.into(),
            modifiers: modifiers.into_iter().map(Into::into).collect(),
        })
        .await?;
        Ok(())
    }
}

// ============================================================================
// Elements
// ============================================================================

impl Client {
    /// Increments a slider or stepper.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn increment_element(&self, selector: AccessibilitySelector) -> Result<ElementResult> {
        let response = self.send(Command::IncrementElement { selector }).await?;
        Ok(element_result(response.element_label))
    }

    /// Decrements a slider or stepper.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn decrement_element(&self, selector: AccessibilitySelector) -> Result<ElementResult> {
        let response = self.send(Command::DecrementElement { selector }).await?;
        Ok(element_result(response.element_label))
    }

    /// Replaces the value of the element matching `selector`.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn set_element_value(
        &self,
        text: impl Into<String>,
        selector: AccessibilitySelector,
    ) -> Result<ElementResult> {
        let response = self
            .send(Command::SetElementValue {
                text: text.into(),
                selector,
            })
            .await?;
        Ok(element_result(response.element_label))
    }
}

fn element_result(label: Option<String>) -> ElementResult {
    ElementResult {
        element_label: label.unwrap_or_default(),
    }
}

// ============================================================================
// Apps
// ============================================================================

impl Client {
    /// Launches an installed app.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn launch_app(&self, bundle_id: impl Into<String>) -> Result<()> {
        self.send(Command::LaunchApp {
            bundle_id: bundle_id.into(),
        })
        .await?;
        Ok(())
    }

    /// Lists installed apps.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`], or [`Error::Json`](crate::Error::Json)
    /// if the app list cannot be parsed.
    pub async fn list_apps(&self) -> Result<Vec<InstalledApp>> {
        let response = self.send(Command::ListApps).await?;
        let apps = serde_json::from_str(response.apps.as_deref().unwrap_or("[]"))?;
        Ok(apps)
    }

    /// Opens a URL (web page or deep link) on the device.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn open_url(&self, url: impl Into<String>) -> Result<()> {
        self.send(Command::OpenUrl { url: url.into() }).await?;
        Ok(())
    }

    /// Installs an `.ipa` or `.app` (optionally zipped) from a URL.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`].
    pub async fn install_app(
        &self,
        url: impl Into<String>,
        options: AppInstallationOptions,
    ) -> Result<AppInstallationResult> {
        let response = self
            .send(Command::AppInstallation {
                url: url.into(),
                md5: options.md5,
                launch_mode: options.launch_mode,
            })
            .await?;
        Ok(AppInstallationResult {
            url: response.url.unwrap_or_default(),
            bundle_id: response.bundle_id.unwrap_or_default(),
        })
    }
}

// ============================================================================
// System
// ============================================================================

impl Client {
    /// Lists open Unix sockets on the instance.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::send`], or [`Error::Json`](crate::Error::Json)
    /// if the file list cannot be parsed.
    pub async fn lsof(&self) -> Result<Vec<LsofEntry>> {
        let response = self
            .send(Command::ListOpenFiles {
                kind: "unix".to_string(),
            })
            .await?;
        let files = serde_json::from_value(response.files.unwrap_or(Value::Array(Vec::new())))?;
        Ok(files)
    }
}
