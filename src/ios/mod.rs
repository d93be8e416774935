//! Client for iOS instances.
//!
//! | Part | Contents |
//! |------|----------|
//! | [`Client`] | connection, request correlation, teardown |
//! | [`actions`] | typed actions such as [`Client::tap`] |
//! | [`Simctl`] | streaming `simctl` invocations |
//! | [`OutputBuffer`], [`OutputPipe`] | output destinations |
//! | [`types`] | action results and options |

// ============================================================================
// Submodules
// ============================================================================

/// Typed device actions.
pub mod actions;

/// Connection and request correlation.
pub mod client;

/// Output sinks and pipes.
pub mod output;

/// Streaming simctl commands.
pub mod simctl;

/// Result and option types.
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{Client, ClientOptions};
pub use output::{OutputBuffer, OutputPipe};
pub use simctl::Simctl;
pub use types::{
    AccessibilityPoint, AccessibilitySelector, AppInstallationOptions, AppInstallationResult,
    ElementResult, InstalledApp, LaunchMode, LsofEntry, Orientation, ScreenshotData,
    TapElementResult,
};
