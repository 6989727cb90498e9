//! In-process store with sorted sets, plain values and key expiration.
//!
//! Used for tests and for running the service without Redis. State is local
//! to the process, so it gives no cross-instance guarantees.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{Store, StoreError, StoreResult};
use crate::ratelimit::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    /// Members ordered by (score, member)
    SortedSet(BTreeSet<(i64, String)>),
    Plain(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Expiry in clock milliseconds
    expires_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A [`Store`] held in a concurrent map.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store that expires keys on wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that expires keys on `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Scores stored at `key`, lowest first.
    pub fn scores(&self, key: &str) -> Vec<i64> {
        let now = self.clock.now_millis();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::SortedSet(set) => set.iter().map(|(score, _)| *score).collect(),
                Value::Plain(_) => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Remaining time to live of `key`, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        let entry = self.entries.get(key)?;
        let at = entry.expires_at?;
        (at > now).then(|| Duration::from_millis((at - now) as u64))
    }

    /// Drop `key` if it has expired, so callers see it as absent.
    fn purge_expired(&self, key: &str, now: i64) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    /// Expiry deadline for a key written at `now`, saturating at `i64::MAX`.
    fn deadline(now: i64, ttl: Duration) -> i64 {
        i64::try_from(ttl.as_millis())
            .map(|millis| now.saturating_add(millis))
            .unwrap_or(i64::MAX)
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::Backend(format!("WRONGTYPE key {} holds the wrong kind of value", key))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64) -> StoreResult<u64> {
        let now = self.clock.now_millis();
        self.purge_expired(key, now);

        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::SortedSet(set) = &mut entry.value else {
            return Err(Self::wrong_type(key));
        };

        let before = set.len();
        set.retain(|(score, _)| *score < min || *score > max);
        let removed = (before - set.len()) as u64;
        let empty = set.is_empty();
        drop(entry);

        if empty {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> StoreResult<u64> {
        let now = self.clock.now_millis();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::SortedSet(set) => Ok(set.len() as u64),
                Value::Plain(_) => Err(Self::wrong_type(key)),
            },
            _ => Ok(0),
        }
    }

    async fn add(&self, key: &str, score: i64, member: &str) -> StoreResult<()> {
        let now = self.clock.now_millis();
        self.purge_expired(key, now);

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::SortedSet(BTreeSet::new()),
            expires_at: None,
        });
        let Value::SortedSet(set) = &mut entry.value else {
            return Err(Self::wrong_type(key));
        };

        // A member appears once; re-adding it moves it to the new score
        set.retain(|(_, existing)| existing != member);
        set.insert((score, member.to_string()));
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.now_millis();
        self.purge_expired(key, now);

        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Self::deadline(now, ttl));
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        self.purge_expired(key, now);

        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: Value::Plain(value.to_string()),
                    expires_at: Some(Self::deadline(now, ttl)),
                });
                Ok(true)
            }
        }
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        let removed = self.entries.remove_if(key, |_, entry| {
            !entry.is_expired(now) && matches!(&entry.value, Value::Plain(v) if v == value)
        });
        Ok(removed.is_some())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
