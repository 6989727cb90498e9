//! Algorithm selection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{CallerKey, Clock, Decision, LeakyBucketLimiter, SlidingWindowLimiter};
use crate::error::Result;
use crate::store::{DistributedLock, StoreClient};

/// The rate limiting algorithm to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Count requests in a trailing window, under a per-caller lock
    SlidingWindow,
    /// Bounded queue drained at `window / limit` per request, lock-free
    LeakyBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generic admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitRequest {
    /// Who is asking
    pub caller: CallerKey,
    /// Window length in seconds
    pub window_secs: u64,
    /// Requests allowed per window
    pub limit: u64,
}

impl LimitRequest {
    pub fn new(caller: impl Into<CallerKey>, window_secs: u64, limit: u64) -> Self {
        Self {
            caller: caller.into(),
            window_secs,
            limit,
        }
    }
}

/// Routes a [`LimitRequest`] to the selected algorithm.
///
/// Holds no rate limiting state of its own; everything lives in the store.
#[derive(Clone)]
pub struct Dispatcher {
    client: StoreClient,
    clock: Arc<dyn Clock>,
    sliding: SlidingWindowLimiter,
}

impl Dispatcher {
    /// Create a dispatcher over an existing store client and lock provider.
    pub fn new(
        client: StoreClient,
        lock: DistributedLock,
        clock: Arc<dyn Clock>,
        lock_ttl: Duration,
    ) -> Self {
        let sliding = SlidingWindowLimiter::new(client.clone(), lock, clock.clone(), lock_ttl);
        Self {
            client,
            clock,
            sliding,
        }
    }

    /// Decide whether `request` may proceed under `algorithm`.
    pub async fn admit(&self, algorithm: Algorithm, request: &LimitRequest) -> bool {
        let allowed = match algorithm {
            Algorithm::SlidingWindow => {
                self.sliding
                    .admit(&request.caller, request.window_secs, request.limit)
                    .await
            }
            Algorithm::LeakyBucket => self.leaky_bucket(request).admit(&request.caller).await,
        };

        info!(
            algorithm = %algorithm,
            caller = %request.caller,
            allowed = allowed,
            "{}",
            if allowed {
                "Request allowed"
            } else {
                "Rate limit exceeded"
            }
        );
        allowed
    }

    /// Fallible form of [`admit`](Self::admit), without logging.
    pub async fn check(&self, algorithm: Algorithm, request: &LimitRequest) -> Result<Decision> {
        match algorithm {
            Algorithm::SlidingWindow => {
                self.sliding
                    .check(&request.caller, request.window_secs, request.limit)
                    .await
            }
            Algorithm::LeakyBucket => self.leaky_bucket(request).check(&request.caller).await,
        }
    }

    /// The store client shared by both algorithms.
    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    fn leaky_bucket(&self, request: &LimitRequest) -> LeakyBucketLimiter {
        LeakyBucketLimiter::from_rate(
            self.client.clone(),
            self.clock.clone(),
            request.window_secs,
            request.limit,
        )
    }
}
