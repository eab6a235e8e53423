//! Refresh-token store keyed by `(user_id, device_id)`.
//!
//! Key layout:
//!
//! - `refresh:{user_id}`: legacy single-device slot
//! - `refresh:{user_id}:{device_id}`: per-device slot
//!
//! Only the SHA-256 digest of a refresh token is stored. Sessions reference
//! users by id and know nothing about the principal schema.

use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::kv::{KvResult, SharedKv};

const PREFIX: &str = "refresh:";

/// Device label reported for the legacy slot.
pub const LEGACY_DEVICE: &str = "default";

/// One live refresh session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub device_id: String,
    /// Seconds until the refresh token expires.
    pub expires_in: Option<u64>,
}

/// Per-device refresh-token store.
#[derive(Clone)]
pub struct SessionStore {
    kv: SharedKv,
}

fn base_key(user_id: &str) -> String {
    format!("{PREFIX}{user_id}")
}

fn slot_key(user_id: &str, device_id: Option<&str>) -> String {
    match device_id {
        Some(device) => format!("{PREFIX}{user_id}:{device}"),
        None => base_key(user_id),
    }
}

fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Equal-length comparison without early exit.
fn digests_equal(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

impl SessionStore {
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    /// Store `token` for the slot, superseding any previous token.
    pub async fn put(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        token: &str,
        ttl: Duration,
    ) -> KvResult<()> {
        self.kv
            .set(&slot_key(user_id, device_id), &digest(token), Some(ttl))
            .await
    }

    /// Stored token digest for the slot, if any.
    pub async fn get(&self, user_id: &str, device_id: Option<&str>) -> KvResult<Option<String>> {
        self.kv.get(&slot_key(user_id, device_id)).await
    }

    /// Whether `presented` is the live token for the slot.
    pub async fn matches(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        presented: &str,
    ) -> KvResult<bool> {
        Ok(self
            .get(user_id, device_id)
            .await?
            .is_some_and(|stored| digests_equal(&stored, &digest(presented))))
    }

    pub async fn delete(&self, user_id: &str, device_id: Option<&str>) -> KvResult<bool> {
        self.kv.del(&slot_key(user_id, device_id)).await
    }

    /// Delete every slot of the user. Scan-then-delete: a `put` racing with
    /// this call may survive it.
    pub async fn delete_all(&self, user_id: &str) -> KvResult<usize> {
        let keys = self.keys_of(user_id).await?;
        let removed = futures::future::try_join_all(keys.iter().map(|key| self.kv.del(key)))
            .await?
            .into_iter()
            .filter(|deleted| *deleted)
            .count();
        debug!(user_id, removed, "deleted all refresh sessions");
        Ok(removed)
    }

    /// Live sessions of the user. The legacy slot is reported as
    /// [`LEGACY_DEVICE`].
    pub async fn list_devices(&self, user_id: &str) -> KvResult<Vec<SessionInfo>> {
        let base = base_key(user_id);
        let mut sessions = Vec::new();
        for key in self.keys_of(user_id).await? {
            let device_id = match key.strip_prefix(&base).and_then(|r| r.strip_prefix(':')) {
                Some(device) => device.to_string(),
                None => LEGACY_DEVICE.to_string(),
            };
            let expires_in = self.kv.ttl(&key).await?.map(|d| d.as_secs());
            sessions.push(SessionInfo {
                device_id,
                expires_in,
            });
        }
        sessions.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(sessions)
    }

    /// Keys that belong to exactly this user: the base slot or `base:*`.
    /// A plain prefix scan of `refresh:u1` would also catch `refresh:u10`.
    async fn keys_of(&self, user_id: &str) -> KvResult<Vec<String>> {
        let base = base_key(user_id);
        let device_prefix = format!("{base}:");
        Ok(self
            .kv
            .scan_prefix(&base)
            .await?
            .into_iter()
            .filter(|k| *k == base || k.starts_with(&device_prefix))
            .collect())
    }
}
