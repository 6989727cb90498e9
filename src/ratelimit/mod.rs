//! Rate limiting algorithms over the shared store.
//!
//! Both limiters keep per-caller markers in a sorted set scored by Unix
//! milliseconds. Any failure to read or update that state denies the request.

mod clock;
mod dispatch;
mod key;
mod leaky;
mod sliding;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{Algorithm, Dispatcher, LimitRequest};
pub use key::CallerKey;
pub use leaky::LeakyBucketLimiter;
pub use sliding::SlidingWindowLimiter;

use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{Result, TurnstileError};

/// Longest accepted window or leak interval, in seconds (roughly 100 years).
///
/// Keeps millisecond cutoffs and expiry deadlines well inside `i64` for any
/// realistic timestamp.
pub const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allow,
    /// The request is over its limit
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Unique sorted-set member for a marker observed at `now`.
///
/// Sorted-set members are a set, so two requests in the same millisecond
/// need distinct members to be counted twice.
pub(crate) fn marker(now: i64) -> String {
    format!("{}-{}", now, Uuid::new_v4())
}

/// Oldest score still inside a window of length `window` ending at `now`.
pub(crate) fn window_cutoff(now: i64, window: Duration) -> Result<i64> {
    if window.as_secs() > MAX_WINDOW_SECS {
        return Err(window_too_long());
    }
    i64::try_from(window.as_millis())
        .ok()
        .and_then(|millis| now.checked_sub(millis))
        .ok_or_else(window_too_long)
}

pub(crate) fn window_too_long() -> TurnstileError {
    TurnstileError::Parameter(format!(
        "window must be at most {} seconds",
        MAX_WINDOW_SECS
    ))
}

/// Log why a check failed. Every failure is a denial.
pub(crate) fn report_failure(algorithm: Algorithm, caller: &CallerKey, err: &TurnstileError) {
    match err {
        TurnstileError::LockUnavailable { key } => {
            debug!(
                algorithm = %algorithm,
                caller = %caller,
                lock = %key,
                "Lock held elsewhere, denying request"
            );
        }
        TurnstileError::Store(store_err) if err.is_breaker_open() => {
            warn!(
                algorithm = %algorithm,
                caller = %caller,
                operation = ?store_err.operation(),
                "Store circuit breaker open, denying request"
            );
        }
        TurnstileError::Store(store_err) => {
            error!(
                algorithm = %algorithm,
                caller = %caller,
                operation = ?store_err.operation(),
                error = %store_err,
                "Store operation failed, denying request"
            );
        }
        other => {
            debug!(
                algorithm = %algorithm,
                caller = %caller,
                error = %other,
                "Rejecting check, denying request"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_are_unique_within_a_millisecond() {
        let a = marker(1_000);
        let b = marker(1_000);

        assert_ne!(a, b);
        assert!(a.starts_with("1000-"));
    }

    #[test]
    fn test_window_cutoff() {
        assert_eq!(window_cutoff(5_000, Duration::from_secs(2)).unwrap(), 3_000);
        assert_eq!(window_cutoff(0, Duration::from_secs(1)).unwrap(), -1_000);

        let longest = Duration::from_secs(MAX_WINDOW_SECS);
        assert!(window_cutoff(1_700_000_000_000, longest).is_ok());
    }

    #[test]
    fn test_window_cutoff_rejects_unrepresentable_windows() {
        let now = 1_700_000_000_000;

        for secs in [MAX_WINDOW_SECS + 1, 9_223_372_036_854_776, u64::MAX] {
            let err = window_cutoff(now, Duration::from_secs(secs)).unwrap_err();
            assert!(matches!(err, TurnstileError::Parameter(_)), "window {}s", secs);
        }
        assert!(window_cutoff(i64::MIN, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_decision() {
        assert!(Decision::Allow.is_allowed());
        assert!(!Decision::Deny.is_allowed());
    }
}
