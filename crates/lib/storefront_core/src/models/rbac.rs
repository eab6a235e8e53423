//! Role and role-assignment models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named bundle of permission strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    /// Unique machine name, e.g. `finance_manager`.
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a role.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    /// Falls back to `name` when empty.
    #[serde(default)]
    pub display_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Grant of a role to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: String,
    pub user_id: String,
    pub role_id: String,
    pub granted_by: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl RoleAssignment {
    /// Active and not past its expiry at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Fields required to assign a role.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub user_id: String,
    pub role_id: String,
    pub granted_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}
