//! Access token minting and verification (HS256), plus opaque refresh tokens.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::{Rng, rng};

use super::AuthError;
use crate::models::auth::AccessClaims;

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime: 30 days.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct MintedAccess {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access tokens with the process secret.
///
/// The secret is loaded once at startup and never rotated in-process.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &[u8], access_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Mint a signed access token with a fresh 128-bit `token_id`.
    pub fn mint_access(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        is_company_admin: bool,
    ) -> Result<MintedAccess, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.access_ttl)
            .map_err(|e| AuthError::Internal(format!("access ttl: {e}")))?;
        let expires_at = now + ttl;
        let claims = AccessClaims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            is_company_admin,
            token_id: random_token(16),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))?;
        Ok(MintedAccess {
            token,
            token_id: claims.token_id,
            expires_at,
        })
    }

    /// Verify signature and expiry, returning the claims.
    pub fn parse_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.decode(token, true)
    }

    /// Verify the signature only. Used by the refresh flow, where an expired
    /// access token is the expected input.
    pub fn parse_access_allow_expired(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.decode(token, false)
    }

    fn decode(&self, token: &str, validate_exp: bool) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        validation.set_required_spec_claims(&["exp"]);
        decode::<AccessClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenError(e.to_string()),
            })
    }
}

/// Mint an opaque refresh token: 256 random bits, URL-safe.
pub fn mint_refresh() -> String {
    random_token(32)
}

/// `len` random bytes, base64url without padding.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}
