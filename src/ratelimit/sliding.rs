//! Sliding-window limiter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{
    marker, report_failure, window_cutoff, window_too_long, Algorithm, CallerKey, Clock,
    Decision, MAX_WINDOW_SECS,
};
use crate::error::{Result, TurnstileError};
use crate::store::{DistributedLock, StoreClient};

/// Admits at most `limit` requests per caller in any trailing window.
///
/// The prune-count-insert sequence runs under the caller's distributed lock,
/// so concurrent checks for the same caller, from any process, are
/// serialized. A contended lock denies instead of waiting. A check abandoned
/// while holding the lock releases it in the background.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    client: StoreClient,
    lock: DistributedLock,
    clock: Arc<dyn Clock>,
    lock_ttl: Duration,
}

impl SlidingWindowLimiter {
    /// Create a new limiter. `lock_ttl` bounds how long a crashed holder can
    /// block a caller and is independent of the window length.
    pub fn new(
        client: StoreClient,
        lock: DistributedLock,
        clock: Arc<dyn Clock>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            client,
            lock,
            clock,
            lock_ttl,
        }
    }

    /// Decide whether `caller` may make another request.
    ///
    /// Returns `false` when the window is full and on any failure.
    pub async fn admit(&self, caller: &CallerKey, window_secs: u64, limit: u64) -> bool {
        match self.check(caller, window_secs, limit).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                report_failure(Algorithm::SlidingWindow, caller, &e);
                false
            }
        }
    }

    /// Fallible form of [`admit`](Self::admit).
    pub async fn check(&self, caller: &CallerKey, window_secs: u64, limit: u64) -> Result<Decision> {
        if window_secs == 0 {
            return Err(TurnstileError::Parameter(
                "window must be at least one second".to_string(),
            ));
        }
        if window_secs > MAX_WINDOW_SECS {
            return Err(window_too_long());
        }
        if limit == 0 {
            return Ok(Decision::Deny);
        }

        let guard = self.lock.acquire_guard(&caller.lock_key(), self.lock_ttl).await?;
        let result = self
            .check_locked(caller, Duration::from_secs(window_secs), limit)
            .await;
        guard.release().await;
        result
    }

    async fn check_locked(&self, caller: &CallerKey, window: Duration, limit: u64) -> Result<Decision> {
        let key = caller.window_key();
        let now = self.clock.now_millis();
        let cutoff = window_cutoff(now, window)?;

        let pruned = self.client.prune(&key, 0, cutoff).await?;
        let count = self.client.count(&key).await?;

        trace!(
            caller = %caller,
            pruned = pruned,
            count = count,
            limit = limit,
            "Sliding window state"
        );

        if count >= limit {
            debug!(caller = %caller, count = count, limit = limit, "Sliding window full");
            return Ok(Decision::Deny);
        }

        self.client.insert(&key, now, &marker(now)).await?;
        self.client.expire(&key, window).await?;
        Ok(Decision::Allow)
    }
}
