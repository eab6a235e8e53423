//! Account deletion cascade.
//!
//! The orchestrator revokes every session and bans the account before the
//! purge starts; the purger then removes what the core owns. Other
//! collaborators (orders, addresses, media) plug in by wrapping a purger.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::kv::SharedKv;
use crate::store::{StoreError, StoreResult, UserStore};

#[async_trait]
pub trait AccountPurger: Send + Sync {
    async fn purge(&self, user_id: &str) -> StoreResult<()>;
}

/// Removes the cart key, role assignments and the user row.
#[derive(Clone)]
pub struct StorePurger {
    users: Arc<dyn UserStore>,
    kv: SharedKv,
}

impl StorePurger {
    pub fn new(users: Arc<dyn UserStore>, kv: SharedKv) -> Self {
        Self { users, kv }
    }
}

#[async_trait]
impl AccountPurger for StorePurger {
    async fn purge(&self, user_id: &str) -> StoreResult<()> {
        if let Err(e) = self.kv.del(&format!("cart:{user_id}")).await {
            warn!(user_id, error = %e, "could not drop cart during purge");
        }
        let assignments = self.users.delete_assignments_of(user_id).await?;
        match self.users.delete_principal(user_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        info!(user_id, assignments, "account purged");
        Ok(())
    }
}
