//! Breaker-guarded store client.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::{BreakerState, CircuitBreaker, Store, StoreError, StoreResult};

/// Store operations, used to tag errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    /// Remove markers by score range
    Prune,
    /// Sorted-set cardinality
    Count,
    /// Add a marker
    Insert,
    /// Refresh key expiration
    Expire,
    /// Claim a lock key
    LockAcquire,
    /// Release a lock key
    LockRelease,
    /// Liveness check
    Ping,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Prune => "prune",
            StoreOp::Count => "count",
            StoreOp::Insert => "insert",
            StoreOp::Expire => "expire",
            StoreOp::LockAcquire => "lock_acquire",
            StoreOp::LockRelease => "lock_release",
            StoreOp::Ping => "ping",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client for the shared store.
///
/// Every operation runs through one [`CircuitBreaker`] and is bounded by a
/// per-call timeout; a timed-out call counts as a breaker failure. Backend
/// errors come back wrapped in [`StoreError::Operation`]. Cloning is cheap
/// and clones share the same breaker.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn Store>,
    breaker: Arc<CircuitBreaker>,
    call_timeout: Duration,
}

impl StoreClient {
    /// Create a new client around `store`.
    pub fn new(store: Arc<dyn Store>, breaker: Arc<CircuitBreaker>, call_timeout: Duration) -> Self {
        Self {
            store,
            breaker,
            call_timeout,
        }
    }

    /// The breaker guarding this client.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Remove markers in `[min, max]` from the sorted set at `key`.
    pub async fn prune(&self, key: &str, min: i64, max: i64) -> StoreResult<u64> {
        self.run(StoreOp::Prune, key, self.store.remove_range_by_score(key, min, max))
            .await
    }

    /// Count markers in the sorted set at `key`.
    pub async fn count(&self, key: &str) -> StoreResult<u64> {
        self.run(StoreOp::Count, key, self.store.cardinality(key)).await
    }

    /// Add a marker to the sorted set at `key`.
    pub async fn insert(&self, key: &str, score: i64, member: &str) -> StoreResult<()> {
        self.run(StoreOp::Insert, key, self.store.add(key, score, member))
            .await
    }

    /// Refresh the expiration of `key`.
    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.run(StoreOp::Expire, key, self.store.expire(key, ttl)).await
    }

    /// Claim `key` with `token` if nobody holds it.
    pub async fn try_claim(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        self.run(
            StoreOp::LockAcquire,
            key,
            self.store.set_if_absent(key, token, ttl),
        )
        .await
    }

    /// Drop the claim on `key` if it is still held by `token`.
    pub async fn release_claim(&self, key: &str, token: &str) -> StoreResult<bool> {
        self.run(
            StoreOp::LockRelease,
            key,
            self.store.delete_if_equals(key, token),
        )
        .await
    }

    /// Check the store is reachable.
    pub async fn ping(&self) -> StoreResult<()> {
        self.run(StoreOp::Ping, "", self.store.ping()).await
    }

    async fn run<T, F>(&self, operation: StoreOp, key: &str, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        trace!(operation = %operation, key = %key, "Store call");

        let timeout = self.call_timeout;
        self.breaker
            .call(operation, async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(source)) => Err(StoreError::Operation {
                        operation,
                        source: Box::new(source),
                    }),
                    Err(_) => Err(StoreError::Timeout { operation, timeout }),
                }
            })
            .await
    }
}
