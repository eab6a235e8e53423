//! Postgres-backed audit store (`audit_logs` table).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{AuditEvent, AuditQuery, AuditStore};
use crate::store::postgres::DEFAULT_DB_TIMEOUT;
use crate::store::{StoreError, StoreResult};

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    user_id: Option<String>,
    email: Option<String>,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    old_value: Option<Value>,
    new_value: Option<Value>,
    ip: Option<String>,
    user_agent: Option<String>,
    success: bool,
    error_msg: Option<String>,
    session_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEvent {
    fn from(row: AuditRow) -> Self {
        AuditEvent {
            id: row.id,
            user_id: row.user_id,
            email: row.email,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            old_value: row.old_value,
            new_value: row.new_value,
            ip: row.ip,
            user_agent: row.user_agent,
            success: row.success,
            error_msg: row.error_msg,
            session_id: row.session_id,
            timestamp: row.created_at,
        }
    }
}

/// Audit store over its own pool, which may point at a separate database.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_timeout(pool, DEFAULT_DB_TIMEOUT)
    }

    pub fn with_timeout(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, sqlx::Error>> + Send,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Unavailable("audit database call timed out".into())),
        }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, event: &AuditEvent) -> StoreResult<()> {
        let insert = sqlx::query(
            "INSERT INTO audit_logs (id, user_id, email, action, resource_type, resource_id, \
             old_value, new_value, ip, user_agent, success, error_msg, session_id, created_at) \
             VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&event.id)
        .bind(&event.user_id)
        .bind(&event.email)
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.old_value)
        .bind(&event.new_value)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(event.success)
        .bind(&event.error_msg)
        .bind(&event.session_id)
        .bind(event.timestamp)
        .execute(&self.pool);
        self.bounded(insert).await.map(|_| ())
    }

    async fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id::text, user_id, email, action, resource_type, resource_id, old_value, \
             new_value, ip, user_agent, success, error_msg, session_id, created_at \
             FROM audit_logs WHERE TRUE",
        );
        if let Some(user_id) = &query.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(action) = &query.action {
            qb.push(" AND action = ").push_bind(action);
        }
        if let Some(resource) = &query.resource {
            qb.push(" AND resource_type = ").push_bind(resource);
        }
        if let Some(success) = query.success {
            qb.push(" AND success = ").push_bind(success);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(query.effective_limit()));

        let rows = self
            .bounded(qb.build_query_as::<AuditRow>().fetch_all(&self.pool))
            .await?;
        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.bounded(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}
