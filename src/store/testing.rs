//! Store doubles shared by unit tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{MemoryStore, Store, StoreError, StoreOp, StoreResult};

/// A store whose every call fails, counting how often it was contacted.
#[derive(Default)]
pub(crate) struct FailingStore {
    pub calls: AtomicUsize,
}

impl FailingStore {
    fn fail(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend("connection refused".to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn remove_range_by_score(&self, _: &str, _: i64, _: i64) -> StoreResult<u64> {
        self.fail().map(|_| 0)
    }
    async fn cardinality(&self, _: &str) -> StoreResult<u64> {
        self.fail().map(|_| 0)
    }
    async fn add(&self, _: &str, _: i64, _: &str) -> StoreResult<()> {
        self.fail()
    }
    async fn expire(&self, _: &str, _: Duration) -> StoreResult<()> {
        self.fail()
    }
    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
        self.fail().map(|_| false)
    }
    async fn delete_if_equals(&self, _: &str, _: &str) -> StoreResult<bool> {
        self.fail().map(|_| false)
    }
    async fn ping(&self) -> StoreResult<()> {
        self.fail()
    }
}

/// A store that never answers.
pub(crate) struct HangingStore;

#[async_trait]
impl Store for HangingStore {
    async fn remove_range_by_score(&self, _: &str, _: i64, _: i64) -> StoreResult<u64> {
        std::future::pending().await
    }
    async fn cardinality(&self, _: &str) -> StoreResult<u64> {
        std::future::pending().await
    }
    async fn add(&self, _: &str, _: i64, _: &str) -> StoreResult<()> {
        std::future::pending().await
    }
    async fn expire(&self, _: &str, _: Duration) -> StoreResult<()> {
        std::future::pending().await
    }
    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
        std::future::pending().await
    }
    async fn delete_if_equals(&self, _: &str, _: &str) -> StoreResult<bool> {
        std::future::pending().await
    }
    async fn ping(&self) -> StoreResult<()> {
        std::future::pending().await
    }
}

#[derive(Clone, Copy)]
enum Fault {
    Fail,
    Hang,
}

/// A [`MemoryStore`] where one operation misbehaves and the rest work.
pub(crate) struct FaultyStore {
    inner: Arc<MemoryStore>,
    op: StoreOp,
    fault: Fault,
}

impl FaultyStore {
    /// `op` returns a backend error.
    pub fn failing(inner: Arc<MemoryStore>, op: StoreOp) -> Self {
        Self {
            inner,
            op,
            fault: Fault::Fail,
        }
    }

    /// `op` never completes.
    pub fn hanging(inner: Arc<MemoryStore>, op: StoreOp) -> Self {
        Self {
            inner,
            op,
            fault: Fault::Hang,
        }
    }

    async fn run<T>(&self, op: StoreOp, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        if op != self.op {
            return call.await;
        }
        match self.fault {
            Fault::Fail => Err(StoreError::Backend(format!("{} rejected", op))),
            Fault::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64) -> StoreResult<u64> {
        self.run(StoreOp::Prune, self.inner.remove_range_by_score(key, min, max)).await
    }
    async fn cardinality(&self, key: &str) -> StoreResult<u64> {
        self.run(StoreOp::Count, self.inner.cardinality(key)).await
    }
    async fn add(&self, key: &str, score: i64, member: &str) -> StoreResult<()> {
        self.run(StoreOp::Insert, self.inner.add(key, score, member)).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.run(StoreOp::Expire, self.inner.expire(key, ttl)).await
    }
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.run(StoreOp::LockAcquire, self.inner.set_if_absent(key, value, ttl)).await
    }
    async fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.run(StoreOp::LockRelease, self.inner.delete_if_equals(key, value)).await
    }
    async fn ping(&self) -> StoreResult<()> {
        self.run(StoreOp::Ping, self.inner.ping()).await
    }
}
