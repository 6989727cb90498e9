//! Circuit breaker guarding the shared store connection.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::{StoreError, StoreOp, StoreResult};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through
    Closed,
    /// Calls fail immediately
    Open,
    /// One trial call is allowed to probe recovery
    HalfOpen,
}

#[derive(Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

struct Inner {
    state: State,
    /// Bumped on every transition so late results from an earlier state are ignored.
    generation: u64,
}

/// A process-local circuit breaker shared by every caller of one store connection.
///
/// The breaker opens once consecutive failures exceed the configured
/// threshold, rejects all calls for the cool-down period, then lets a single
/// probe through. A successful probe closes the breaker; a failed one reopens
/// it for another cool-down.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cool_down: Duration,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("cool_down", &self.cool_down)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission to run one call through the breaker.
///
/// Dropping a permit without recording an outcome counts as a failure, so an
/// abandoned half-open probe cannot wedge the breaker.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    recorded: bool,
}

impl Permit<'_> {
    fn record(mut self, success: bool) {
        self.recorded = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.record(self.generation, false);
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            cool_down,
            inner: Mutex::new(Inner {
                state: State::Closed {
                    consecutive_failures: 0,
                },
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current state.
    ///
    /// An open breaker whose cool-down has elapsed reports `HalfOpen`, since
    /// the next call will be let through as a probe.
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock();
        match inner.state {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { until } if Instant::now() >= until => BreakerState::HalfOpen,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen => BreakerState::HalfOpen,
        }
    }

    /// Run `call` through the breaker.
    ///
    /// When the breaker refuses, `call` is dropped without being polled and
    /// [`StoreError::BreakerOpen`] is returned. Any `Err` from `call` counts
    /// as a failure.
    pub async fn call<T, F>(&self, operation: StoreOp, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let permit = self
            .try_acquire()
            .ok_or(StoreError::BreakerOpen { operation })?;

        let result = call.await;
        permit.record(result.is_ok());
        result
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed { .. } => {}
            State::Open { until } => {
                if Instant::now() < until {
                    return None;
                }
                inner.state = State::HalfOpen;
                inner.generation += 1;
                info!(breaker = %self.name, "Circuit breaker half-open, probing store");
            }
            State::HalfOpen => return None,
        }

        Some(Permit {
            breaker: self,
            generation: inner.generation,
            recorded: false,
        })
    }

    fn record(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }

        match inner.state {
            State::Closed { .. } if success => {
                inner.state = State::Closed {
                    consecutive_failures: 0,
                };
            }
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures > self.failure_threshold {
                    self.trip(&mut inner);
                    warn!(
                        breaker = %self.name,
                        consecutive_failures = failures,
                        cool_down = ?self.cool_down,
                        "Circuit breaker opened"
                    );
                } else {
                    inner.state = State::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            State::HalfOpen if success => {
                inner.state = State::Closed {
                    consecutive_failures: 0,
                };
                inner.generation += 1;
                info!(breaker = %self.name, "Circuit breaker closed, store recovered");
            }
            State::HalfOpen => {
                self.trip(&mut inner);
                warn!(
                    breaker = %self.name,
                    cool_down = ?self.cool_down,
                    "Circuit breaker probe failed, reopening"
                );
            }
            State::Open { .. } => {}
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = State::Open {
            until: Instant::now() + self.cool_down,
        };
        inner.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failure() -> StoreResult<()> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn fail_times(breaker: &CircuitBreaker, calls: &AtomicUsize, times: usize) {
        for _ in 0..times {
            let _ = breaker
                .call(StoreOp::Count, async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    failure()
                })
                .await;
        }
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(5));
        assert_eq!(breaker.state(), BreakerState::Closed);

        let result = breaker.call(StoreOp::Count, async { Ok(7u64) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_exceeded() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(5));
        let calls = AtomicUsize::new(0);

        fail_times(&breaker, &calls, 3).await;
        assert_eq!(breaker.state(), BreakerState::Closed);

        fail_times(&breaker, &calls, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Further calls fail fast without running the operation
        for _ in 0..5 {
            let result = breaker
                .call(StoreOp::Insert, async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert!(matches!(
                result,
                Err(StoreError::BreakerOpen {
                    operation: StoreOp::Insert
                })
            ));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(5));
        let calls = AtomicUsize::new(0);

        fail_times(&breaker, &calls, 2).await;
        breaker.call(StoreOp::Count, async { Ok(()) }).await.unwrap();
        fail_times(&breaker, &calls, 2).await;

        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_probe_success_closes() {
        let breaker = CircuitBreaker::new("test", 0, Duration::from_millis(50));
        let calls = AtomicUsize::new(0);

        fail_times(&breaker, &calls, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.call(StoreOp::Count, async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("test", 0, Duration::from_millis(50));
        let calls = AtomicUsize::new(0);

        fail_times(&breaker, &calls, 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        fail_times(&breaker, &calls, 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_exactly_one_probe_while_half_open() {
        let breaker = Arc::new(CircuitBreaker::new("test", 0, Duration::from_millis(50)));
        let calls = Arc::new(AtomicUsize::new(0));

        fail_times(&breaker, &calls, 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        calls.store(0, Ordering::SeqCst);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let breaker = breaker.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    breaker
                        .call(StoreOp::Count, async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let succeeded = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(()))))
            .count();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(succeeded, 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_probe_counts_as_failure() {
        let breaker = CircuitBreaker::new("test", 0, Duration::from_millis(50));
        let calls = AtomicUsize::new(0);

        fail_times(&breaker, &calls, 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let probe = breaker.call(StoreOp::Count, std::future::pending::<StoreResult<()>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(20), probe).await;
        assert!(timed_out.is_err());

        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
