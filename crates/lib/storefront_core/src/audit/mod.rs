//! Best-effort asynchronous audit trail.
//!
//! Callers enqueue onto a bounded channel and never wait on audit I/O. A
//! small pool of writer tasks drains the channel into an [`AuditStore`].
//! When the channel is full the event is dropped and counted. A failed
//! write is logged and never reaches the user-facing request.

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::store::StoreResult;
use crate::ids::new_id;

pub use memory::MemoryAuditStore;
pub use postgres::PgAuditStore;

/// Action names.
pub mod actions {
    pub const LOGIN_SUCCESS: &str = "auth.login_success";
    pub const LOGIN_FAILED: &str = "auth.login_failed";
    pub const LOGOUT: &str = "auth.logout";
    pub const REFRESH: &str = "auth.refresh";
    pub const PASSWORD_CHANGE: &str = "auth.password_change";
    pub const PASSWORD_RESET: &str = "auth.password_reset";
    pub const SESSIONS_REVOKE: &str = "auth.sessions_revoke";
    pub const TOKEN_REJECTED: &str = "auth.token_rejected";
    pub const USER_CREATE: &str = "user.create";
    pub const USER_DELETE: &str = "user.delete";
    pub const USER_BAN: &str = "user.ban";
    pub const USER_UNBAN: &str = "user.unban";
    pub const ROLE_CREATE: &str = "role.create";
    pub const ROLE_ASSIGN: &str = "role.assign";
    pub const ROLE_REVOKE: &str = "role.revoke";
    pub const ROLE_DISABLE: &str = "role.disable";
    pub const PERMISSION_DENIED: &str = "permission.denied";
}

/// Resource types.
pub mod resources {
    pub const AUTH: &str = "auth";
    pub const USER: &str = "user";
    pub const ROLE: &str = "role";
}

/// Request-derived fields attached to every event.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

impl AuditContext {
    /// Same request, attributed to `user_id`.
    pub fn for_user(&self, user_id: &str, email: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            email: (!email.is_empty()).then(|| email.to_string()),
            ..self.clone()
        }
    }
}

/// Append-only record of a mutating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_msg: Option<String>,
    pub session_id: Option<String>,
    /// Wall-clock time of enqueue.
    pub timestamp: DateTime<Utc>,
}

/// What happened, independent of who asked.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    action: &'static str,
    resource_type: &'static str,
    resource_id: Option<String>,
    old_value: Option<Value>,
    new_value: Option<Value>,
}

impl AuditEntry {
    pub fn new(action: &'static str, resource_type: &'static str) -> Self {
        Self {
            action,
            resource_type,
            resource_id: None,
            old_value: None,
            new_value: None,
        }
    }

    pub fn resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn old_value(mut self, value: Value) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn new_value(mut self, value: Value) -> Self {
        self.new_value = Some(value);
        self
    }
}

/// Filter for reading the trail back, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub success: Option<bool>,
    pub limit: Option<u32>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 500;

    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.user_id
            .as_ref()
            .is_none_or(|u| event.user_id.as_ref() == Some(u))
            && self.action.as_ref().is_none_or(|a| &event.action == a)
            && self
                .resource
                .as_ref()
                .is_none_or(|r| &event.resource_type == r)
            && self.success.is_none_or(|s| event.success == s)
    }
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, event: &AuditEvent) -> StoreResult<()>;
    async fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>>;
    async fn ping(&self) -> StoreResult<()>;
}

/// Default channel bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default writer pool size.
pub const DEFAULT_WORKERS: usize = 2;

/// Non-blocking handle onto the audit queue. Cheap to clone.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Start `workers` writer tasks over a channel bounded at `capacity`.
    /// Writers exit once every sink clone has been dropped and the queue
    /// is drained.
    pub fn spawn(store: Arc<dyn AuditStore>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(event) = next else { break };
                    if let Err(e) = store.insert(&event).await {
                        metrics::counter!("storefront_audit_write_failures_total").increment(1);
                        warn!(worker, action = %event.action, error = %e, "audit write failed");
                    }
                }
                debug!(worker, "audit writer stopped");
            });
        }
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn log(&self, ctx: &AuditContext, entry: AuditEntry) {
        self.enqueue(ctx, entry, true, None);
    }

    pub fn log_failure(&self, ctx: &AuditContext, entry: AuditEntry, error_msg: &str) {
        self.enqueue(ctx, entry, false, Some(error_msg.to_string()));
    }

    /// Events discarded because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(
        &self,
        ctx: &AuditContext,
        entry: AuditEntry,
        success: bool,
        error_msg: Option<String>,
    ) {
        let event = AuditEvent {
            id: new_id().to_string(),
            user_id: ctx.user_id.clone(),
            email: ctx.email.clone(),
            action: entry.action.to_string(),
            resource_type: entry.resource_type.to_string(),
            resource_id: entry.resource_id,
            old_value: entry.old_value,
            new_value: entry.new_value,
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            success,
            error_msg,
            session_id: ctx.session_id.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("storefront_audit_dropped_total").increment(1);
            let (reason, ev) = match &e {
                mpsc::error::TrySendError::Full(ev) => ("full", ev),
                mpsc::error::TrySendError::Closed(ev) => ("closed", ev),
            };
            warn!(action = %ev.action, reason, "audit queue rejected event, dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;

    /// Accepts writes only when a permit is available.
    struct GatedStore {
        inner: MemoryAuditStore,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl AuditStore for GatedStore {
        async fn insert(&self, event: &AuditEvent) -> StoreResult<()> {
            let _permit = self.gate.acquire().await;
            self.inner.insert(event).await
        }
        async fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
            self.inner.query(query).await
        }
        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    async fn wait_for(store: &MemoryAuditStore, n: usize) -> Vec<AuditEvent> {
        for _ in 0..200 {
            let events = store.all().await;
            if events.len() >= n {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("audit events never arrived");
    }

    fn ctx() -> AuditContext {
        AuditContext {
            user_id: Some("u1".into()),
            email: Some("a@x.io".into()),
            ip: Some("10.0.0.1".into()),
            user_agent: Some("test".into()),
            session_id: Some("s1".into()),
        }
    }

    #[tokio::test]
    async fn events_reach_the_store_with_context() {
        let store = MemoryAuditStore::new();
        let sink = AuditSink::spawn(Arc::new(store.clone()), 16, 2);

        sink.log(
            &ctx(),
            AuditEntry::new(actions::ROLE_ASSIGN, resources::ROLE)
                .resource_id("r1")
                .new_value(json!({"user_id": "u2"})),
        );
        sink.log_failure(
            &ctx(),
            AuditEntry::new(actions::LOGIN_FAILED, resources::AUTH),
            "bad password",
        );

        let events = wait_for(&store, 2).await;
        let assign = events.iter().find(|e| e.action == actions::ROLE_ASSIGN).unwrap();
        assert!(assign.success);
        assert_eq!(assign.resource_id.as_deref(), Some("r1"));
        assert_eq!(assign.session_id.as_deref(), Some("s1"));
        assert_eq!(assign.new_value, Some(json!({"user_id": "u2"})));

        let failed = events.iter().find(|e| e.action == actions::LOGIN_FAILED).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error_msg.as_deref(), Some("bad password"));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let store = MemoryAuditStore::new();
        let gate = Arc::new(Semaphore::new(0));
        let sink = AuditSink::spawn(
            Arc::new(GatedStore {
                inner: store.clone(),
                gate: Arc::clone(&gate),
            }),
            2,
            1,
        );

        for _ in 0..10 {
            sink.log(&ctx(), AuditEntry::new(actions::LOGOUT, resources::AUTH));
        }
        // One event may sit in the stalled writer, two in the channel.
        assert!(sink.dropped() >= 7);

        gate.add_permits(100);
        let kept = 10 - sink.dropped() as usize;
        assert_eq!(wait_for(&store, kept).await.len(), kept);
    }

    #[test]
    fn query_limits_are_clamped() {
        assert_eq!(AuditQuery::default().effective_limit(), 100);
        let big = AuditQuery {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(big.effective_limit(), 500);
    }
}
