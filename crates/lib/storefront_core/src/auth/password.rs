//! Password hashing via argon2id, with transparent migration of legacy
//! bcrypt hashes.
//!
//! Encoded hashes are self-describing PHC strings
//! (`$argon2id$v=19$m=19456,t=2,p=1$<salt>$<hash>`), so verification never
//! needs out-of-band parameters. The algorithm tag prefix selects the
//! verifier.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        self, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
        rand_core::OsRng,
    },
};
use thiserror::Error;

/// Password hashing errors.
#[derive(Debug, Error)]
pub enum PasswordError {
    /// The stored hash could not be parsed. Distinct from a mismatch so
    /// callers can tell corruption apart from a wrong password.
    #[error("malformed password hash: {0}")]
    Malformed(String),

    #[error("unsupported password hash algorithm")]
    UnsupportedAlgorithm,

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Fixed salt for [`CredentialHasher::verify_absent`].
const DECOY_SALT: &str = "c3RvcmVmcm9udC1kZWNveQ";

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| PasswordError::Hashing(format!("argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn matches(&self, params: &Params) -> bool {
        params.m_cost() == self.memory_kib
            && params.t_cost() == self.iterations
            && params.p_cost() == self.parallelism
    }
}

impl Default for Argon2Params {
    /// Roughly 20 ms on one modern core.
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Result of checking a plaintext against a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub matched: bool,
    /// Set on a match when the stored hash should be replaced with a fresh
    /// hash under the current algorithm and parameters.
    pub needs_rehash: bool,
}

impl Verification {
    const MISMATCH: Self = Self {
        matched: false,
        needs_rehash: false,
    };
}

/// Algorithm family identified from an encoded hash prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Argon2,
    Bcrypt,
}

impl Scheme {
    fn detect(encoded: &str) -> Option<Self> {
        if encoded.starts_with("$argon2") {
            Some(Self::Argon2)
        } else if ["$2a$", "$2b$", "$2y$"]
            .iter()
            .any(|p| encoded.starts_with(p))
        {
            Some(Self::Bcrypt)
        } else {
            None
        }
    }
}

/// Hashes and verifies passwords. Cheap to clone.
///
/// Both operations are CPU-bound; async callers should run them on
/// `tokio::task::spawn_blocking`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialHasher {
    params: Argon2Params,
}

impl CredentialHasher {
    pub fn new(params: Argon2Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> Argon2Params {
        self.params
    }

    /// Hash a plaintext password with a fresh 16-byte salt.
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .params
            .to_argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Verify a plaintext password against an encoded hash.
    ///
    /// The final digest comparison is constant time for both schemes.
    pub fn verify(&self, plaintext: &str, encoded: &str) -> Result<Verification, PasswordError> {
        match Scheme::detect(encoded) {
            Some(Scheme::Argon2) => self.verify_argon2(plaintext, encoded),
            Some(Scheme::Bcrypt) => {
                let matched = bcrypt::verify(plaintext, encoded)
                    .map_err(|e| PasswordError::Malformed(format!("bcrypt: {e}")))?;
                Ok(Verification {
                    matched,
                    needs_rehash: matched,
                })
            }
            None => Err(PasswordError::UnsupportedAlgorithm),
        }
    }

    /// Spend the cost of one verification without a stored hash, for
    /// unknown accounts and accounts with no local credential. Never
    /// matches.
    pub fn verify_absent(&self, plaintext: &str) -> Result<Verification, PasswordError> {
        let salt = SaltString::from_b64(DECOY_SALT)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        self.params
            .to_argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(Verification::MISMATCH)
    }

    fn verify_argon2(&self, plaintext: &str, encoded: &str) -> Result<Verification, PasswordError> {
        let parsed =
            PasswordHash::new(encoded).map_err(|e| PasswordError::Malformed(e.to_string()))?;
        if parsed.salt.is_none() || parsed.hash.is_none() {
            return Err(PasswordError::Malformed("missing salt or digest".into()));
        }

        // Parameters come from the hash itself.
        match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => {}
            Err(password_hash::Error::Password) => return Ok(Verification::MISMATCH),
            Err(e) => return Err(PasswordError::Malformed(e.to_string())),
        }

        let current = parsed.algorithm.as_str() == "argon2id"
            && Params::try_from(&parsed)
                .map(|p| self.params.matches(&p))
                .unwrap_or(false);

        Ok(Verification {
            matched: true,
            needs_rehash: !current,
        })
    }
}
