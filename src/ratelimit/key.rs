//! Caller identity and store key derivation.

use std::fmt;

/// Prefix for sliding-window markers.
pub const WINDOW_PREFIX: &str = "window";
/// Prefix for leaky-bucket markers.
pub const BUCKET_PREFIX: &str = "bucket";
/// Prefix for per-caller locks.
pub const LOCK_PREFIX: &str = "lock";

/// Opaque identity of a rate-limited principal.
///
/// Each algorithm derives its own namespaced store key from the caller, so
/// the same caller never collides across algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerKey(String);

impl CallerKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key holding this caller's sliding window.
    pub fn window_key(&self) -> String {
        self.namespaced(WINDOW_PREFIX)
    }

    /// Store key holding this caller's leaky bucket.
    pub fn bucket_key(&self) -> String {
        self.namespaced(BUCKET_PREFIX)
    }

    /// Store key of this caller's distributed lock.
    pub fn lock_key(&self) -> String {
        self.namespaced(LOCK_PREFIX)
    }

    fn namespaced(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.0)
    }
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallerKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CallerKey {
    fn from(id: String) -> Self {
        Self(id)
    }
}
