//! Permission catalog and the seeded default roles.

use tracing::info;

use crate::models::rbac::NewRole;
use crate::store::{StoreError, StoreResult, UserStore};

pub const PRODUCTS_VIEW: &str = "products.view";
pub const PRODUCTS_CREATE: &str = "products.create";
pub const PRODUCTS_EDIT: &str = "products.edit";
pub const PRODUCTS_DELETE: &str = "products.delete";
pub const PRODUCTS_PRICE: &str = "products.price";

pub const ORDERS_VIEW: &str = "orders.view";
pub const ORDERS_EDIT: &str = "orders.edit";
pub const ORDERS_CANCEL: &str = "orders.cancel";
pub const ORDERS_REFUND: &str = "orders.refund";

pub const USERS_VIEW: &str = "users.view";
pub const USERS_CREATE: &str = "users.create";
pub const USERS_EDIT: &str = "users.edit";
pub const USERS_DELETE: &str = "users.delete";
pub const USERS_BAN: &str = "users.ban";

pub const FINANCE_VIEW: &str = "finance.view";
pub const FINANCE_INVOICES: &str = "finance.invoices";
pub const FINANCE_REPORTS: &str = "finance.reports";
pub const FINANCE_REFUNDS: &str = "finance.refunds";

pub const COUPONS_VIEW: &str = "coupons.view";
pub const COUPONS_CREATE: &str = "coupons.create";
pub const COUPONS_EDIT: &str = "coupons.edit";
pub const COUPONS_DELETE: &str = "coupons.delete";

pub const INVENTORY_VIEW: &str = "inventory.view";
pub const INVENTORY_EDIT: &str = "inventory.edit";
pub const INVENTORY_ALERTS: &str = "inventory.alerts";

pub const ANALYTICS_VIEW: &str = "analytics.view";
pub const ANALYTICS_ADVANCED: &str = "analytics.advanced";
pub const REPORTS_VIEW: &str = "reports.view";
pub const REPORTS_EXPORT: &str = "reports.export";

pub const ADMIN_ROLES: &str = "admin.roles";
pub const ADMIN_PERMISSIONS: &str = "admin.permissions";
pub const ADMIN_LOGS: &str = "admin.logs";
pub const ADMIN_SETTINGS: &str = "admin.settings";

/// Every known permission.
pub const ALL_PERMISSIONS: &[&str] = &[
    PRODUCTS_VIEW,
    PRODUCTS_CREATE,
    PRODUCTS_EDIT,
    PRODUCTS_DELETE,
    PRODUCTS_PRICE,
    ORDERS_VIEW,
    ORDERS_EDIT,
    ORDERS_CANCEL,
    ORDERS_REFUND,
    USERS_VIEW,
    USERS_CREATE,
    USERS_EDIT,
    USERS_DELETE,
    USERS_BAN,
    FINANCE_VIEW,
    FINANCE_INVOICES,
    FINANCE_REPORTS,
    FINANCE_REFUNDS,
    COUPONS_VIEW,
    COUPONS_CREATE,
    COUPONS_EDIT,
    COUPONS_DELETE,
    INVENTORY_VIEW,
    INVENTORY_EDIT,
    INVENTORY_ALERTS,
    ANALYTICS_VIEW,
    ANALYTICS_ADVANCED,
    REPORTS_VIEW,
    REPORTS_EXPORT,
    ADMIN_ROLES,
    ADMIN_PERMISSIONS,
    ADMIN_LOGS,
    ADMIN_SETTINGS,
];

pub fn is_known(permission: &str) -> bool {
    ALL_PERMISSIONS.contains(&permission)
}

/// Static definition of a seeded role.
#[derive(Debug, Clone, Copy)]
pub struct RoleSeed {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub permissions: &'static [&'static str],
}

impl RoleSeed {
    fn to_new_role(self) -> NewRole {
        NewRole {
            name: self.name.to_string(),
            display_name: self.display_name.to_string(),
            description: Some(self.description.to_string()),
            permissions: self.permissions.iter().map(|p| p.to_string()).collect(),
        }
    }
}

pub const DEFAULT_ROLES: [RoleSeed; 6] = [
    RoleSeed {
        name: "super_admin",
        display_name: "Super Administrateur",
        description: "Accès complet à toutes les fonctionnalités",
        permissions: ALL_PERMISSIONS,
    },
    RoleSeed {
        name: "finance_manager",
        display_name: "Responsable Financier",
        description: "Gestion des finances, factures et remboursements",
        permissions: &[
            ORDERS_VIEW,
            ORDERS_REFUND,
            FINANCE_VIEW,
            FINANCE_INVOICES,
            FINANCE_REPORTS,
            FINANCE_REFUNDS,
            ANALYTICS_VIEW,
            REPORTS_VIEW,
            REPORTS_EXPORT,
        ],
    },
    RoleSeed {
        name: "inventory_manager",
        display_name: "Responsable Stock",
        description: "Gestion de l'inventaire et des produits",
        permissions: &[
            PRODUCTS_VIEW,
            PRODUCTS_CREATE,
            PRODUCTS_EDIT,
            INVENTORY_VIEW,
            INVENTORY_EDIT,
            INVENTORY_ALERTS,
            ANALYTICS_VIEW,
        ],
    },
    RoleSeed {
        name: "marketing_manager",
        display_name: "Responsable Marketing",
        description: "Gestion des promotions et coupons",
        permissions: &[
            PRODUCTS_VIEW,
            COUPONS_VIEW,
            COUPONS_CREATE,
            COUPONS_EDIT,
            COUPONS_DELETE,
            ANALYTICS_VIEW,
            REPORTS_VIEW,
        ],
    },
    RoleSeed {
        name: "customer_service",
        display_name: "Service Client",
        description: "Gestion des commandes et support client",
        permissions: &[
            PRODUCTS_VIEW,
            ORDERS_VIEW,
            ORDERS_EDIT,
            ORDERS_CANCEL,
            USERS_VIEW,
            FINANCE_REFUNDS,
        ],
    },
    RoleSeed {
        name: "analyst",
        display_name: "Analyste",
        description: "Consultation des données et rapports",
        permissions: &[
            PRODUCTS_VIEW,
            ORDERS_VIEW,
            USERS_VIEW,
            ANALYTICS_VIEW,
            ANALYTICS_ADVANCED,
            REPORTS_VIEW,
            REPORTS_EXPORT,
        ],
    },
];

/// Insert each default role that does not exist yet (matched by name).
/// Returns how many were created. Safe to run on every start.
pub async fn seed_default_roles(store: &dyn UserStore) -> StoreResult<usize> {
    let mut created = 0;
    for seed in DEFAULT_ROLES {
        if store.find_role_by_name(seed.name).await?.is_some() {
            continue;
        }
        match store.create_role(seed.to_new_role()).await {
            Ok(role) => {
                info!(role = %role.name, "seeded default role");
                created += 1;
            }
            // Another instance seeded it concurrently.
            Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(created)
}
