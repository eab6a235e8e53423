//! Row identifiers.
//!
//! Roles, role grants and audit events get UUIDv7 ids minted here so they
//! sort by creation time. Principals take theirs from `gen_random_uuid()`
//! in the `users` table default. Ids reach the stores as strings from
//! tokens and URL paths and are parsed back before any query.

use uuid::Uuid;

/// Time-ordered id for a new role, grant or audit event.
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Parse an id received from a token or path. `None` means it cannot name
/// any stored row.
pub fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim()).ok()
}
