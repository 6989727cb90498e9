//! Shared store access.
//!
//! The limiters only need a sorted-set abstraction with score-range deletion
//! and key expiration, plus a set-if-absent/compare-and-delete pair for the
//! distributed lock. [`Store`] captures exactly that; [`StoreClient`] wraps a
//! store in a circuit breaker and a per-call timeout.

mod breaker;
mod client;
mod lock;
pub mod memory;
pub mod redis;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{StoreClient, StoreOp};
pub use lock::{DistributedLock, LockGuard, LockHandle};
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors returned by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The circuit breaker refused the call without contacting the store
    #[error("circuit breaker open, {operation} not attempted")]
    BreakerOpen { operation: StoreOp },

    /// The call did not complete within the configured timeout
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: StoreOp,
        timeout: Duration,
    },

    /// A store call failed
    #[error("{operation} failed: {source}")]
    Operation {
        operation: StoreOp,
        #[source]
        source: Box<StoreError>,
    },

    /// Backend-specific failure
    #[error("store backend error: {0}")]
    Backend(String),

    /// Redis client failure
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

impl StoreError {
    /// The operation this error came from, when known.
    pub fn operation(&self) -> Option<StoreOp> {
        match self {
            StoreError::BreakerOpen { operation }
            | StoreError::Timeout { operation, .. }
            | StoreError::Operation { operation, .. } => Some(*operation),
            StoreError::Backend(_) | StoreError::Redis(_) => None,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Operations required of the shared backing store.
///
/// Implementations must make each call atomic with respect to other callers
/// of the same key; the limiters never rely on in-process locking.
#[async_trait]
pub trait Store: Send + Sync {
    /// Remove members of the sorted set at `key` with `min <= score <= max`.
    ///
    /// Returns the number of members removed. A missing key removes nothing.
    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64) -> StoreResult<u64>;

    /// Number of members in the sorted set at `key` (0 when absent).
    async fn cardinality(&self, key: &str) -> StoreResult<u64>;

    /// Insert `member` with `score` into the sorted set at `key`.
    async fn add(&self, key: &str, score: i64, member: &str) -> StoreResult<()>;

    /// Expire the whole key after `ttl`.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Set `key` to `value` with a TTL, only if the key does not exist.
    ///
    /// Returns `false` when the key is already present.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete `key` only if it currently holds `value`.
    ///
    /// Returns whether a deletion happened.
    async fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Round-trip to the store.
    async fn ping(&self) -> StoreResult<()>;
}
