//! JSON protocol of the device signaling endpoint.
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`Request`] | client → device | command with a fresh `id` |
//! | [`Response`] | device → client | answer echoing the `id` |
//! | [`Response`] with `type: "simctlStream"` | device → client | streaming command output |
//!
//! A non-empty `error` field turns a response into an application error
//! for the matching request only.

// ============================================================================
// Submodules
// ============================================================================

/// Command catalogue and value types.
pub mod command;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{AccessibilityPoint, AccessibilitySelector, Command, LaunchMode, Orientation};
pub use request::{Request, Response, SIMCTL_STREAM};
