//! Distributed mutual exclusion on top of the shared store.

use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::StoreClient;
use crate::error::{Result, TurnstileError};

/// Proof of holding a lock.
///
/// The handle is only meaningful until its TTL elapses; after that the store
/// may hand the key to someone else and [`DistributedLock::release`] reports
/// that ownership was lost.
#[derive(Debug)]
#[must_use = "a lock handle should be released"]
pub struct LockHandle {
    key: String,
    token: String,
    ttl: Duration,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// A held lock that is released when dropped.
///
/// [`release`](Self::release) is the normal path. Dropping an unreleased
/// guard, for example when the owning future is cancelled, spawns the release
/// on the current runtime; without a runtime the TTL reclaims the key.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    lock: DistributedLock,
    handle: Option<LockHandle>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        self.handle.as_ref().map(LockHandle::key).unwrap_or_default()
    }

    /// Release the lock, returning whether it was still held.
    pub async fn release(mut self) -> bool {
        match self.handle.take() {
            Some(handle) => self.lock.release(handle).await,
            None => false,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        debug!(key = %handle.key, "Lock guard dropped while held, releasing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lock = self.lock.clone();
                runtime.spawn(async move {
                    lock.release(handle).await;
                });
            }
            Err(_) => {
                warn!(
                    key = %handle.key,
                    ttl = ?handle.ttl,
                    "No runtime to release lock, leaving it to expire"
                );
            }
        }
    }
}

/// Lock provider backed by set-if-absent and compare-and-delete.
///
/// Acquisition never waits: a held key is reported as
/// [`TurnstileError::LockUnavailable`] immediately.
#[derive(Clone)]
pub struct DistributedLock {
    client: StoreClient,
}

impl DistributedLock {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    /// Try once to claim `key` for `ttl`.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockHandle> {
        let token = Uuid::new_v4().to_string();

        if self.client.try_claim(key, &token, ttl).await? {
            debug!(key = %key, ttl = ?ttl, "Lock acquired");
            Ok(LockHandle {
                key: key.to_string(),
                token,
                ttl,
            })
        } else {
            Err(TurnstileError::LockUnavailable {
                key: key.to_string(),
            })
        }
    }

    /// Like [`acquire`](Self::acquire), but the lock is released when the
    /// returned guard is dropped.
    pub async fn acquire_guard(&self, key: &str, ttl: Duration) -> Result<LockGuard> {
        let handle = self.acquire(key, ttl).await?;
        Ok(LockGuard {
            lock: self.clone(),
            handle: Some(handle),
        })
    }

    /// Release a lock, returning whether it was still held by `handle`.
    ///
    /// Failures are logged and reported as `false`; the TTL reclaims the key
    /// regardless.
    pub async fn release(&self, handle: LockHandle) -> bool {
        match self.client.release_claim(&handle.key, &handle.token).await {
            Ok(true) => {
                debug!(key = %handle.key, "Lock released");
                true
            }
            Ok(false) => {
                warn!(
                    key = %handle.key,
                    ttl = ?handle.ttl,
                    "Lock expired before release"
                );
                false
            }
            Err(e) => {
                warn!(key = %handle.key, error = %e, "Failed to release lock");
                false
            }
        }
    }
}
