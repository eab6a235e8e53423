//! In-memory audit store for development and tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AuditEvent, AuditQuery, AuditStore};
use crate::store::StoreResult;

#[derive(Debug, Clone, Default)]
pub struct MemoryAuditStore {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event in insertion order.
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, event: &AuditEvent) -> StoreResult<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        let mut matched: Vec<AuditEvent> =
            events.iter().filter(|e| query.matches(e)).cloned().collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.effective_limit() as usize);
        Ok(matched)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
