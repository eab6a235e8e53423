//! Access-token blacklist and user ban list.
//!
//! `blacklist:{token_id}` → `"revoked"`, expiring with the token itself.
//! `banned:{user_id}` → `"true"`, no expiry.
//!
//! Lookups fail open by default: an unreachable store answers "not revoked"
//! so a cache partition does not lock out every user. With `fail_open` off
//! the error propagates instead.

use std::time::Duration;

use tracing::info;

use crate::kv::{FailOpenCounter, KvError, KvResult, SharedKv};

const BLACKLIST_PREFIX: &str = "blacklist:";
const BANNED_PREFIX: &str = "banned:";

/// Shortest blacklist TTL; a token about to expire still gets an entry.
const MIN_BLACKLIST_TTL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct RevocationStore {
    kv: SharedKv,
    fail_open: bool,
    failures: FailOpenCounter,
}

impl RevocationStore {
    pub fn new(kv: SharedKv, fail_open: bool, failures: FailOpenCounter) -> Self {
        Self {
            kv,
            fail_open,
            failures,
        }
    }

    pub fn fail_open(&self) -> bool {
        self.fail_open
    }

    /// Blacklist a token id until `ttl` elapses. Idempotent.
    pub async fn blacklist(&self, token_id: &str, ttl: Duration) -> KvResult<()> {
        self.kv
            .set(
                &format!("{BLACKLIST_PREFIX}{token_id}"),
                "revoked",
                Some(ttl.max(MIN_BLACKLIST_TTL)),
            )
            .await
    }

    pub async fn is_blacklisted(&self, token_id: &str) -> KvResult<bool> {
        let result = self.kv.exists(&format!("{BLACKLIST_PREFIX}{token_id}")).await;
        self.tolerate("is_blacklisted", result)
    }

    pub async fn ban(&self, user_id: &str) -> KvResult<()> {
        self.kv
            .set(&format!("{BANNED_PREFIX}{user_id}"), "true", None)
            .await?;
        info!(user_id, "user banned");
        Ok(())
    }

    pub async fn unban(&self, user_id: &str) -> KvResult<()> {
        self.kv.del(&format!("{BANNED_PREFIX}{user_id}")).await?;
        info!(user_id, "user unbanned");
        Ok(())
    }

    pub async fn is_banned(&self, user_id: &str) -> KvResult<bool> {
        let result = self.kv.exists(&format!("{BANNED_PREFIX}{user_id}")).await;
        self.tolerate("is_banned", result)
    }

    fn tolerate(&self, op: &str, result: Result<bool, KvError>) -> KvResult<bool> {
        match result {
            Err(e) if self.fail_open => {
                self.failures.record("revocation", op, &e);
                Ok(false)
            }
            other => other,
        }
    }
}
