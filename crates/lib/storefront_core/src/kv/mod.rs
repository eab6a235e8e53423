//! Key–value store abstraction.
//!
//! The single source of authority for refresh sessions, revocation and
//! throttling. Components own disjoint key namespaces (`refresh:`,
//! `blacklist:`, `banned:`, `{scope}_attempts:`, `{scope}_cooldown:`,
//! `reset_token:`, `cart:`), so no cross-component locking is needed.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub use memory::MemoryKv;

/// Default per-call deadline for KV operations.
pub const DEFAULT_KV_TIMEOUT: Duration = Duration::from_secs(3);

/// Key–value store errors.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),

    #[error("key-value store call timed out")]
    Timeout,

    #[error("key-value protocol error: {0}")]
    Protocol(String),
}

pub type KvResult<T> = Result<T, KvError>;

/// Minimal async key–value contract. Every individual operation is atomic.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Set `key`, replacing any previous value and TTL. `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()>;

    /// Returns whether a key was removed.
    async fn del(&self, key: &str) -> KvResult<bool>;

    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// Remaining lifetime. `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>>;

    /// Increment an integer counter and (re)attach `ttl` in one round trip.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> KvResult<i64>;

    /// All live keys starting with `prefix`, gathered with an incremental
    /// cursor. Keys written concurrently may or may not be observed.
    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<String>>;

    async fn ping(&self) -> KvResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Shared handle used by every component.
pub type SharedKv = Arc<dyn KvStore>;

/// Open a store from a URL: `memory://` or, with the `redis` feature,
/// `redis://` / `rediss://`.
pub async fn connect(url: &str) -> KvResult<SharedKv> {
    if url.starts_with("memory:") {
        return Ok(Arc::new(MemoryKv::new()));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return connect_redis(url).await;
    }
    Err(KvError::Unavailable(format!("unsupported KV url scheme: {url}")))
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> KvResult<SharedKv> {
    Ok(Arc::new(redis_store::RedisKv::connect(url).await?))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(url: &str) -> KvResult<SharedKv> {
    Err(KvError::Unavailable(format!(
        "built without the `redis` feature, cannot open {url}"
    )))
}

/// Tally of KV failures that were tolerated by letting the request through.
/// Clones share the count; surfaced by the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct FailOpenCounter(Arc<AtomicU64>);

impl FailOpenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and count one fail-open decision.
    pub fn record(&self, component: &'static str, op: &str, err: &KvError) {
        warn!(component, op, error = %err, "key-value store failed, failing open");
        metrics::counter!("storefront_kv_fail_open_total", "component" => component).increment(1);
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Decorator applying a deadline to every call of the inner store.
pub struct TimedKv {
    inner: SharedKv,
    deadline: Duration,
}

impl TimedKv {
    pub fn new(inner: SharedKv, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn run<T>(&self, fut: impl Future<Output = KvResult<T>> + Send) -> KvResult<T> {
        tokio::time::timeout(self.deadline, fut)
            .await
            .map_err(|_| KvError::Timeout)?
    }
}

#[async_trait]
impl KvStore for TimedKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.run(self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        self.run(self.inner.set(key, value, ttl)).await
    }

    async fn del(&self, key: &str) -> KvResult<bool> {
        self.run(self.inner.del(key)).await
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.run(self.inner.exists(key)).await
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        self.run(self.inner.ttl(key)).await
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> KvResult<i64> {
        self.run(self.inner.incr_with_ttl(key, ttl)).await
    }

    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<String>> {
        self.run(self.inner.scan_prefix(prefix)).await
    }

    async fn ping(&self) -> KvResult<()> {
        self.run(self.inner.ping()).await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
