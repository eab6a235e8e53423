//! Outbound mail collaborator.
//!
//! Delivery and templating live outside this crate; the core only hands
//! over a recipient and a link.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> Result<(), MailError>;
}

/// Records outgoing mail in the log instead of sending it.
///
/// The link carries a live reset token, so only a short fingerprint of it
/// is logged.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> Result<(), MailError> {
        info!(to = %email, link_sha256 = %fingerprint(reset_link), "password reset mail");
        Ok(())
    }
}

/// First 8 hex digits of the SHA-256 of `value`.
fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}
