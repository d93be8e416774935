//! Type-safe identifiers for multiplexed sessions.
//!
//! Newtype wrappers keep connection IDs (binary multiplexer) and request IDs
//! (JSON RPC) from being mixed up.
//!
//! | Type | Wire form | Scope |
//! |------|-----------|-------|
//! | [`ConnectionId`] | big-endian `u32` frame prefix | one multiplexed WebSocket |
//! | [`RequestId`] | JSON string `id` field | one RPC client |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionId
// ============================================================================

/// Identifier tagging which local TCP session a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// Wraps a raw wire value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ConnectionId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

// ============================================================================
// ConnectionIdAllocator
// ============================================================================

/// Monotonic connection ID source for one multiplexed transport.
///
/// IDs start at 1 and are never reused. Once the `u32` space is exhausted
/// [`next`](Self::next) returns `None` instead of wrapping around.
#[derive(Debug, Default)]
pub struct ConnectionIdAllocator {
    last: AtomicU32,
}

impl ConnectionIdAllocator {
    /// Creates an allocator whose first ID is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU32::new(0),
        }
    }

    /// Returns the next unused ID.
    pub fn next(&self) -> Option<ConnectionId> {
        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                last.checked_add(1)
            })
            .ok()
            .map(|previous| ConnectionId(previous + 1))
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Correlation ID of an RPC request or streaming command.
///
/// The server echoes it back in every response belonging to the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// RequestIdGenerator
// ============================================================================

/// Generates request IDs of the form `rs-<unix nanos>-<counter>`.
///
/// The counter alone guarantees uniqueness within one client; the timestamp
/// keeps IDs from different clients of the same process distinguishable in
/// server logs.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a generator starting at counter 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Returns a fresh request ID.
    pub fn generate(&self) -> RequestId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        RequestId(format!("rs-{nanos}-{seq}"))
    }
}

// ============================================================================
// Tests
// ============================================================================
