//! Leaky-bucket limiter.
//!
//! The bucket is parameterized by `capacity` and `leak_interval`: a marker
//! drains `leak_interval` after it was added, so at most `capacity` requests
//! are outstanding at once. The rate form used by the HTTP surface
//! (`window / limit` per request) is converted with
//! [`LeakyBucketLimiter::from_rate`], where `leak_rate * capacity` is exactly
//! the window. Both entry points therefore enforce the same bound.
//!
//! Checks are not locked. Two concurrent requests can both see a count just
//! under capacity and both insert, overshooting by at most the number of
//! concurrent racers. This is an accepted approximation for lower latency.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{marker, report_failure, window_cutoff, Algorithm, CallerKey, Clock, Decision};
use crate::error::Result;
use crate::store::StoreClient;

/// A bounded per-caller queue that drains at a fixed rate.
#[derive(Clone)]
pub struct LeakyBucketLimiter {
    client: StoreClient,
    clock: Arc<dyn Clock>,
    capacity: u64,
    leak_interval: Duration,
}

impl LeakyBucketLimiter {
    /// Create a bucket holding up to `capacity` requests, each draining
    /// after `leak_interval`.
    pub fn new(
        client: StoreClient,
        clock: Arc<dyn Clock>,
        capacity: u64,
        leak_interval: Duration,
    ) -> Self {
        Self {
            client,
            clock,
            capacity,
            leak_interval,
        }
    }

    /// Create a bucket from a rate of `limit` requests per `window_secs`.
    ///
    /// Equivalent to `new(client, clock, limit, window)`: the per-request leak
    /// rate is `window / limit` and the bucket holds `limit` requests, so the
    /// leak interval is `leak_rate * limit = window`.
    pub fn from_rate(client: StoreClient, clock: Arc<dyn Clock>, window_secs: u64, limit: u64) -> Self {
        Self::new(client, clock, limit, Duration::from_secs(window_secs))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn leak_interval(&self) -> Duration {
        self.leak_interval
    }

    /// Time for one queued request to drain (`leak_interval / capacity`).
    pub fn leak_rate(&self) -> Duration {
        match u32::try_from(self.capacity) {
            Ok(0) => self.leak_interval,
            Ok(capacity) => self.leak_interval / capacity,
            Err(_) => Duration::ZERO,
        }
    }

    /// Decide whether `caller` may add a request to its bucket.
    ///
    /// Returns `false` when the bucket is full and on any failure.
    pub async fn admit(&self, caller: &CallerKey) -> bool {
        match self.check(caller).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                report_failure(Algorithm::LeakyBucket, caller, &e);
                false
            }
        }
    }

    /// Fallible form of [`admit`](Self::admit).
    pub async fn check(&self, caller: &CallerKey) -> Result<Decision> {
        if self.capacity == 0 {
            return Ok(Decision::Deny);
        }

        let key = caller.bucket_key();
        let now = self.clock.now_millis();
        let cutoff = window_cutoff(now, self.leak_interval)?;

        let leaked = self.client.prune(&key, 0, cutoff).await?;
        let queued = self.client.count(&key).await?;

        trace!(
            caller = %caller,
            leaked = leaked,
            queued = queued,
            capacity = self.capacity,
            "Leaky bucket state"
        );

        if queued >= self.capacity {
            debug!(caller = %caller, queued = queued, capacity = self.capacity, "Bucket full");
            return Ok(Decision::Deny);
        }

        self.client.insert(&key, now, &marker(now)).await?;
        self.client.expire(&key, self.leak_interval).await?;
        Ok(Decision::Allow)
    }
}
