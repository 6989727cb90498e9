//! Redis-backed store.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::Script;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Store, StoreResult};

/// Deletes the key only while it still holds the caller's token.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A [`Store`] over a single Redis node.
///
/// The connection manager reconnects on its own; cloning it per call is
/// cheap and shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url` and verify it answers.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = ::redis::Client::open(url).map_err(|e| {
            warn!(url = %url, error = %e, "Invalid Redis URL");
            e
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to connect to Redis");
            e
        })?;

        let store = Self {
            conn,
            release_script: Script::new(COMPARE_AND_DELETE),
        };
        store.ping().await?;

        debug!(url = %url, "Connected to Redis");
        Ok(store)
    }
}

fn millis(ttl: Duration) -> u64 {
    // PX rejects 0
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Store for RedisStore {
    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = ::redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = ::redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn add(&self, key: &str, score: i64, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _added: u64 = ::redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _applied: u64 = ::redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: u64 = self
            .release_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
