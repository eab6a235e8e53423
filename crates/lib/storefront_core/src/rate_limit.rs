//! Per-scope attempt counters with cool-down escalation.
//!
//! Counters live at `{scope}_attempts:{subject}` with the window as TTL. For
//! scopes with a cool-down, crossing the threshold swaps the counter for a
//! `{scope}_cooldown:{subject}` marker that blocks every attempt until it
//! expires. Scopes without one simply reject while over the threshold.
//!
//! The limiter is a best-effort layer in front of real credential checks:
//! any store failure admits the request.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::kv::{FailOpenCounter, KvResult, SharedKv};

/// Throttled feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Login,
    Register,
    Forgot,
    Api,
    Search,
    Cart,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::Login,
        Scope::Register,
        Scope::Forgot,
        Scope::Api,
        Scope::Search,
        Scope::Cart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Login => "login",
            Scope::Register => "register",
            Scope::Forgot => "forgot",
            Scope::Api => "api",
            Scope::Search => "search",
            Scope::Cart => "cart",
        }
    }

    fn attempts_key(&self, subject: &str) -> String {
        format!("{}_attempts:{subject}", self.as_str())
    }

    fn cooldown_key(&self, subject: &str) -> String {
        format!("{}_cooldown:{subject}", self.as_str())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = RateLimitConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| RateLimitConfigError::UnknownScope(s.to_string()))
    }
}

/// Which handler outcomes advance the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counting {
    /// Count failures; a success clears counter and cool-down.
    OnFailure,
    OnSuccess,
    Always,
}

/// How the handler ended, as seen by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Neither: e.g. a validation error on the login endpoint.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub threshold: u32,
    pub window: Duration,
    pub cooldown: Option<Duration>,
    pub counting: Counting,
}

const MINUTE: u64 = 60;

impl RatePolicy {
    pub fn default_for(scope: Scope) -> Self {
        let (threshold, window, cooldown, counting) = match scope {
            Scope::Login => (5, 15 * MINUTE, Some(15 * MINUTE), Counting::OnFailure),
            Scope::Register => (3, 30 * MINUTE, Some(30 * MINUTE), Counting::OnSuccess),
            Scope::Forgot => (3, 10 * MINUTE, Some(10 * MINUTE), Counting::OnSuccess),
            Scope::Api => (100, MINUTE, None, Counting::Always),
            Scope::Search => (30, MINUTE, None, Counting::Always),
            Scope::Cart => (20, MINUTE, None, Counting::Always),
        };
        Self {
            threshold,
            window: Duration::from_secs(window),
            cooldown: cooldown.map(Duration::from_secs),
            counting,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitConfigError {
    #[error("unknown rate-limit scope: {0}")]
    UnknownScope(String),

    #[error("invalid rate-limit entry `{0}`: expected scope=threshold/window_secs[/cooldown_secs]")]
    InvalidEntry(String),

    #[error("rate-limit scope `{0}` has no cool-down to configure")]
    NoCooldown(Scope),
}

/// Policy table, one entry per scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    policies: HashMap<Scope, RatePolicy>,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            policies: Scope::ALL
                .into_iter()
                .map(|s| (s, RatePolicy::default_for(s)))
                .collect(),
        }
    }
}

impl RateLimits {
    pub fn policy(&self, scope: Scope) -> RatePolicy {
        self.policies
            .get(&scope)
            .copied()
            .unwrap_or_else(|| RatePolicy::default_for(scope))
    }

    pub fn set(&mut self, scope: Scope, policy: RatePolicy) {
        self.policies.insert(scope, policy);
    }

    /// Apply an override table such as `login=10/900/1800,api=200/60`.
    ///
    /// Counting mode is fixed per scope. A cool-down may only be given to
    /// scopes that already escalate, and `0` disables it.
    pub fn apply_overrides(&mut self, table: &str) -> Result<(), RateLimitConfigError> {
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || RateLimitConfigError::InvalidEntry(entry.to_string());
            let (scope, rule) = entry.split_once('=').ok_or_else(invalid)?;
            let scope: Scope = scope.trim().parse()?;
            let parts: Vec<u64> = rule
                .split('/')
                .map(|p| p.trim().parse::<u64>())
                .collect::<Result<_, _>>()
                .map_err(|_| invalid())?;

            let mut policy = self.policy(scope);
            match parts.as_slice() {
                [threshold, window] => {
                    policy.threshold = u32::try_from(*threshold).map_err(|_| invalid())?;
                    policy.window = Duration::from_secs(*window);
                }
                [threshold, window, cooldown] => {
                    if *cooldown > 0 && RatePolicy::default_for(scope).cooldown.is_none() {
                        return Err(RateLimitConfigError::NoCooldown(scope));
                    }
                    policy.threshold = u32::try_from(*threshold).map_err(|_| invalid())?;
                    policy.window = Duration::from_secs(*window);
                    policy.cooldown = (*cooldown > 0).then(|| Duration::from_secs(*cooldown));
                }
                _ => return Err(invalid()),
            }
            if policy.threshold == 0 || policy.window.is_zero() {
                return Err(invalid());
            }
            self.policies.insert(scope, policy);
        }
        Ok(())
    }
}

/// Decision taken before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `count` attempts already recorded in the current window.
    Allowed { count: u32, limit: u32 },
    Rejected { retry_after: Duration },
}

/// Generic limiter shared by every throttled endpoint.
#[derive(Clone)]
pub struct RateLimiter {
    kv: SharedKv,
    limits: RateLimits,
    failures: FailOpenCounter,
}

impl RateLimiter {
    pub fn new(kv: SharedKv, limits: RateLimits, failures: FailOpenCounter) -> Self {
        Self {
            kv,
            limits,
            failures,
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Check cool-down and counter for `(scope, subject)`.
    pub async fn admit(&self, scope: Scope, subject: &str) -> Admission {
        match self.try_admit(scope, subject).await {
            Ok(admission) => admission,
            Err(e) => {
                self.failures.record("rate_limit", scope.as_str(), &e);
                Admission::Allowed {
                    count: 0,
                    limit: self.limits.policy(scope).threshold,
                }
            }
        }
    }

    async fn try_admit(&self, scope: Scope, subject: &str) -> KvResult<Admission> {
        let policy = self.limits.policy(scope);
        let cooldown_key = scope.cooldown_key(subject);

        if let Some(remaining) = self.kv.ttl(&cooldown_key).await? {
            return Ok(Admission::Rejected {
                retry_after: round_up(remaining),
            });
        }

        let attempts_key = scope.attempts_key(subject);
        let count = match self.kv.get(&attempts_key).await? {
            Some(raw) => raw.parse::<u32>().unwrap_or_else(|_| {
                warn!(key = %attempts_key, value = %raw, "ignoring non-numeric rate counter");
                0
            }),
            None => 0,
        };

        if count < policy.threshold {
            return Ok(Admission::Allowed {
                count,
                limit: policy.threshold,
            });
        }

        let retry_after = match policy.cooldown {
            Some(cooldown) => {
                self.kv.set(&cooldown_key, "1", Some(cooldown)).await?;
                self.kv.del(&attempts_key).await?;
                debug!(scope = %scope, subject, "rate-limit cool-down engaged");
                cooldown
            }
            None => self
                .kv
                .ttl(&attempts_key)
                .await?
                .map(round_up)
                .unwrap_or(policy.window),
        };
        Ok(Admission::Rejected { retry_after })
    }

    /// Update counters once the handler has produced `outcome`.
    pub async fn record(&self, scope: Scope, subject: &str, outcome: Outcome) {
        let policy = self.limits.policy(scope);
        let result = match (policy.counting, outcome) {
            (Counting::OnFailure, Outcome::Failure)
            | (Counting::OnSuccess, Outcome::Success)
            | (Counting::Always, _) => self
                .kv
                .incr_with_ttl(&scope.attempts_key(subject), policy.window)
                .await
                .map(|_| ()),
            (Counting::OnFailure, Outcome::Success) => self.reset(scope, subject).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.failures.record("rate_limit", scope.as_str(), &e);
        }
    }

    /// Clear counter and cool-down for `(scope, subject)`.
    pub async fn reset(&self, scope: Scope, subject: &str) -> KvResult<()> {
        self.kv.del(&scope.attempts_key(subject)).await?;
        self.kv.del(&scope.cooldown_key(subject)).await?;
        Ok(())
    }
}

/// Whole seconds, rounded up so a client never retries too early.
fn round_up(d: Duration) -> Duration {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}
