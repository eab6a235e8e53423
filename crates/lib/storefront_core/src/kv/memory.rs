//! In-process key–value store with per-key TTLs.
//!
//! Expiry is measured on the tokio clock, so paused-time tests can fast
//! forward through windows and cool-downs. Expired entries are dropped
//! lazily on access and by [`MemoryKv::purge_expired`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::time::Instant;
use tracing::debug;

use super::{KvError, KvResult, KvStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Concurrent in-memory store. Cheap to clone; clones share the map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purge expired entries until the store is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                let Some(entries) = weak.upgrade() else { break };
                let store = MemoryKv { entries };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired kv entries");
                }
            }
        })
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.live(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, e)| e.is_live(now)))
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> KvResult<i64> {
        let now = Instant::now();
        let expires_at = Some(now + ttl);
        // The shard lock is held for the whole entry, so concurrent
        // increments on one key are linearizable.
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = if entry.is_live(now) {
                    entry.value.parse::<i64>().map_err(|_| {
                        KvError::Protocol(format!("value at {key} is not an integer"))
                    })?
                } else {
                    0
                };
                let next = current + 1;
                entry.value = next.to_string();
                entry.expires_at = expires_at;
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: "1".to_string(),
                    expires_at,
                });
                Ok(1)
            }
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn ping(&self) -> KvResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
