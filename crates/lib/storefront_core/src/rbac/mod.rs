//! Role-based access control.
//!
//! A permission holds for a user iff at least one active, non-expired
//! assignment references an active role whose permission set contains it.
//! Expired assignments are filtered at read time, never pruned.

pub mod catalog;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::store::{StoreResult, UserStore};

/// Default lifetime of a memoized permission set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Memo {
    permissions: Arc<BTreeSet<String>>,
    resolved_at: Instant,
}

/// Resolves user → active roles → permission set, memoizing per user for a
/// few seconds.
///
/// Stale memos are swept on lookup misses, at most once per TTL.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn UserStore>,
    memo: Arc<DashMap<String, Memo>>,
    ttl: Duration,
    last_sweep: Arc<Mutex<Instant>>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn UserStore>, ttl: Duration) -> Self {
        Self {
            store,
            memo: Arc::new(DashMap::new()),
            ttl,
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Union of permissions across the user's live role grants.
    pub async fn permissions_of(&self, user_id: &str) -> StoreResult<Arc<BTreeSet<String>>> {
        if let Some(memo) = self.memo.get(user_id)
            && memo.resolved_at.elapsed() < self.ttl
        {
            return Ok(Arc::clone(&memo.permissions));
        }
        self.sweep_if_due();

        let roles = self.store.granted_roles(user_id, Utc::now()).await?;
        let permissions: Arc<BTreeSet<String>> = Arc::new(
            roles
                .into_iter()
                .flat_map(|r| r.permissions.into_iter())
                .collect(),
        );
        debug!(user_id, count = permissions.len(), "resolved permissions");

        if !self.ttl.is_zero() {
            self.memo.insert(
                user_id.to_string(),
                Memo {
                    permissions: Arc::clone(&permissions),
                    resolved_at: Instant::now(),
                },
            );
        }
        Ok(permissions)
    }

    pub async fn has(&self, user_id: &str, permission: &str) -> StoreResult<bool> {
        Ok(self.permissions_of(user_id).await?.contains(permission))
    }

    pub async fn has_any(&self, user_id: &str, permissions: &[&str]) -> StoreResult<bool> {
        let held = self.permissions_of(user_id).await?;
        Ok(permissions.iter().any(|p| held.contains(*p)))
    }

    /// Drop the memo for one user, after their grants changed.
    pub fn invalidate(&self, user_id: &str) {
        self.memo.remove(user_id);
    }

    /// Drop every memo, after a role definition changed.
    pub fn invalidate_all(&self) {
        self.memo.clear();
    }

    /// Remove memos older than the TTL. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.memo.len();
        self.memo.retain(|_, memo| memo.resolved_at.elapsed() < self.ttl);
        before.saturating_sub(self.memo.len())
    }

    fn sweep_if_due(&self) {
        // Contended sweeps are skipped; the next miss retries.
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if last.elapsed() < self.ttl {
            return;
        }
        *last = Instant::now();
        drop(last);
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "purged stale permission memos");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::models::auth::NewPrincipal;
    use crate::models::rbac::{NewAssignment, NewRole};
    use crate::store::MemoryUserStore;

    async fn setup() -> (PermissionResolver, MemoryUserStore, String) {
        let store = MemoryUserStore::new();
        let user = store
            .create_principal(NewPrincipal::local("carol@x.io", None, "h".into()))
            .await
            .unwrap();
        let resolver = PermissionResolver::new(Arc::new(store.clone()), DEFAULT_CACHE_TTL);
        (resolver, store, user.id)
    }

    async fn grant(
        store: &MemoryUserStore,
        user_id: &str,
        name: &str,
        permissions: &[&str],
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> String {
        let role = store
            .create_role(NewRole {
                name: name.into(),
                display_name: name.into(),
                description: None,
                permissions: permissions.iter().map(|p| p.to_string()).collect(),
            })
            .await
            .unwrap();
        store
            .assign_role(NewAssignment {
                user_id: user_id.into(),
                role_id: role.id.clone(),
                granted_by: None,
                expires_at,
            })
            .await
            .unwrap();
        role.id
    }

    #[tokio::test]
    async fn permissions_are_the_union_of_live_roles() {
        let (resolver, store, uid) = setup().await;
        grant(&store, &uid, "finance", &["orders.refund", "finance.view"], None).await;
        grant(&store, &uid, "support", &["orders.view", "finance.view"], None).await;
        grant(
            &store,
            &uid,
            "lapsed",
            &["admin.roles"],
            Some(Utc::now() - ChronoDuration::seconds(1)),
        )
        .await;
        let disabled = grant(&store, &uid, "disabled", &["users.ban"], None).await;
        store.set_role_active(&disabled, false).await.unwrap();

        let perms = resolver.permissions_of(&uid).await.unwrap();
        let expected: BTreeSet<String> = ["finance.view", "orders.refund", "orders.view"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(*perms, expected);
        assert!(resolver.has(&uid, "orders.refund").await.unwrap());
        assert!(!resolver.has(&uid, "admin.roles").await.unwrap());
        assert!(resolver.has_any(&uid, &["users.ban", "orders.view"]).await.unwrap());
        assert!(!resolver.has_any(&uid, &["users.ban"]).await.unwrap());
    }

    #[tokio::test]
    async fn user_without_roles_has_nothing() {
        let (resolver, _, uid) = setup().await;
        assert!(resolver.permissions_of(&uid).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn memo_holds_until_ttl_or_invalidation() {
        let (resolver, store, uid) = setup().await;
        assert!(!resolver.has(&uid, "orders.refund").await.unwrap());

        let role_id = grant(&store, &uid, "finance", &["orders.refund"], None).await;
        // Still memoized.
        assert!(!resolver.has(&uid, "orders.refund").await.unwrap());

        resolver.invalidate(&uid);
        assert!(resolver.has(&uid, "orders.refund").await.unwrap());

        store.revoke_role(&uid, &role_id).await.unwrap();
        tokio::time::advance(DEFAULT_CACHE_TTL + Duration::from_millis(1)).await;
        assert!(!resolver.has(&uid, "orders.refund").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_memos_are_swept_on_later_misses() {
        let (resolver, store, _) = setup().await;
        for i in 0..50 {
            let user = store
                .create_principal(NewPrincipal::local(&format!("u{i}@x.io"), None, "h".into()))
                .await
                .unwrap();
            resolver.permissions_of(&user.id).await.unwrap();
        }
        assert_eq!(resolver.memo.len(), 50);

        tokio::time::advance(DEFAULT_CACHE_TTL + Duration::from_millis(1)).await;
        let newcomer = store
            .create_principal(NewPrincipal::local("late@x.io", None, "h".into()))
            .await
            .unwrap();
        resolver.permissions_of(&newcomer.id).await.unwrap();
        assert_eq!(resolver.memo.len(), 1);
        assert!(resolver.memo.contains_key(&newcomer.id));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_keeps_live_memos() {
        let (resolver, _, uid) = setup().await;
        resolver.permissions_of(&uid).await.unwrap();
        assert_eq!(resolver.purge_expired(), 0);
        tokio::time::advance(DEFAULT_CACHE_TTL).await;
        assert_eq!(resolver.purge_expired(), 1);
        assert!(resolver.memo.is_empty());
    }
}
