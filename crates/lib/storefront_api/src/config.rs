//! API server configuration.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use storefront_core::audit::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use storefront_core::auth::jwt::{DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL};
use storefront_core::auth::password::Argon2Params;
use storefront_core::kv::DEFAULT_KV_TIMEOUT;
use storefront_core::rate_limit::{RateLimitConfigError, RateLimits};
use storefront_core::rbac::DEFAULT_CACHE_TTL;
use storefront_core::store::postgres::DEFAULT_DB_TIMEOUT;
use thiserror::Error;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error(transparent)]
    RateLimits(#[from] RateLimitConfigError),
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "0.0.0.0:8080").
    pub bind_addr: String,
    /// User store connection URL.
    pub database_url: String,
    /// Audit store connection URL. Defaults to `database_url`.
    pub audit_database_url: String,
    /// `memory://` or `redis://host:port`.
    pub kv_url: String,
    /// HS256 signing secret.
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub rate_limits: RateLimits,
    /// Answer "not revoked" when the KV store is unreachable.
    pub revocation_fail_open: bool,
    /// Issue a new refresh token on every refresh.
    pub rotate_refresh_tokens: bool,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,
    pub permission_cache_ttl: Duration,
    pub audit_queue_capacity: usize,
    pub audit_workers: usize,
    pub kv_timeout: Duration,
    pub db_timeout: Duration,
    /// Base URL of the storefront, used to build password-reset links.
    pub frontend_url: String,
    pub argon2: Argon2Params,
}

impl ApiConfig {
    /// Defaults for everything but the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost:5432/storefront".into(),
            audit_database_url: "postgres://localhost:5432/storefront".into(),
            kv_url: "memory://".into(),
            jwt_secret: jwt_secret.into(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            rate_limits: RateLimits::default(),
            revocation_fail_open: true,
            rotate_refresh_tokens: false,
            trust_forwarded_headers: false,
            permission_cache_ttl: DEFAULT_CACHE_TTL,
            audit_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            audit_workers: DEFAULT_WORKERS,
            kv_timeout: DEFAULT_KV_TIMEOUT,
            db_timeout: DEFAULT_DB_TIMEOUT,
            frontend_url: "http://localhost:3000".into(),
            argon2: Argon2Params::default(),
        }
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                    | Default                                |
    /// |-----------------------------|----------------------------------------|
    /// | `JWT_SECRET`                | required, at least 32 bytes            |
    /// | `BIND_ADDR`                 | `0.0.0.0:$PORT`, `PORT` default `8080` |
    /// | `DATABASE_URL`              | `postgres://localhost:5432/storefront` |
    /// | `AUDIT_DATABASE_URL`        | `DATABASE_URL`                         |
    /// | `KV_URL`                    | `memory://`                            |
    /// | `ACCESS_TOKEN_TTL_SECS`     | `900`                                  |
    /// | `REFRESH_TOKEN_TTL_SECS`    | `2592000`                              |
    /// | `RATE_LIMITS`               | none, e.g. `login=10/900/1800,api=200/60` |
    /// | `REVOCATION_FAIL_OPEN`      | `true`                                 |
    /// | `ROTATE_REFRESH_TOKENS`     | `false`                                |
    /// | `TRUST_FORWARDED_HEADERS`   | `false`                                |
    /// | `PERMISSION_CACHE_TTL_SECS` | `5`                                    |
    /// | `AUDIT_QUEUE_CAPACITY`      | `1024`                                 |
    /// | `AUDIT_WORKERS`             | `2`                                    |
    /// | `KV_TIMEOUT_MS`             | `3000`                                 |
    /// | `DB_TIMEOUT_MS`             | `5000`                                 |
    /// | `FRONTEND_URL`              | `http://localhost:3000`                |
    /// | `ARGON2_MEMORY_KIB` / `ARGON2_ITERATIONS` / `ARGON2_PARALLELISM` | `19456` / `2` / `1` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(|key| vars.get(key).cloned())
    }

    /// Build from an arbitrary variable source.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = get("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }

        let mut config = Self::new(jwt_secret);

        config.bind_addr = match get("BIND_ADDR") {
            Some(addr) => addr,
            None => format!("0.0.0.0:{}", parse::<u16>(&get, "PORT", 8080)?),
        };
        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        config.audit_database_url =
            get("AUDIT_DATABASE_URL").unwrap_or_else(|| config.database_url.clone());
        if let Some(url) = get("KV_URL") {
            config.kv_url = url;
        }

        config.access_ttl = secs(&get, "ACCESS_TOKEN_TTL_SECS", config.access_ttl)?;
        config.refresh_ttl = secs(&get, "REFRESH_TOKEN_TTL_SECS", config.refresh_ttl)?;
        if config.access_ttl.is_zero() || config.refresh_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                var: "ACCESS_TOKEN_TTL_SECS",
                reason: "token lifetimes must be positive".into(),
            });
        }

        if let Some(table) = get("RATE_LIMITS") {
            config.rate_limits.apply_overrides(&table)?;
        }

        config.revocation_fail_open = parse(&get, "REVOCATION_FAIL_OPEN", true)?;
        config.rotate_refresh_tokens = parse(&get, "ROTATE_REFRESH_TOKENS", false)?;
        config.trust_forwarded_headers = parse(&get, "TRUST_FORWARDED_HEADERS", false)?;
        config.permission_cache_ttl =
            secs(&get, "PERMISSION_CACHE_TTL_SECS", config.permission_cache_ttl)?;
        config.audit_queue_capacity =
            parse(&get, "AUDIT_QUEUE_CAPACITY", config.audit_queue_capacity)?;
        config.audit_workers = parse(&get, "AUDIT_WORKERS", config.audit_workers)?;
        config.kv_timeout = Duration::from_millis(parse(
            &get,
            "KV_TIMEOUT_MS",
            config.kv_timeout.as_millis() as u64,
        )?);
        config.db_timeout = Duration::from_millis(parse(
            &get,
            "DB_TIMEOUT_MS",
            config.db_timeout.as_millis() as u64,
        )?);
        if let Some(url) = get("FRONTEND_URL") {
            config.frontend_url = url.trim_end_matches('/').to_string();
        }

        config.argon2 = Argon2Params {
            memory_kib: parse(&get, "ARGON2_MEMORY_KIB", config.argon2.memory_kib)?,
            iterations: parse(&get, "ARGON2_ITERATIONS", config.argon2.iterations)?,
            parallelism: parse(&get, "ARGON2_PARALLELISM", config.argon2.parallelism)?,
        };

        Ok(config)
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse(get, var, default.as_secs()).map(Duration::from_secs)
}
