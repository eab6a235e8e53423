//! Degraded dependencies: an unreachable key-value store, a slow or broken
//! audit store, and request throttling on the API scope.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use serde_json::json;
use storefront_core::audit::{AuditEvent, AuditQuery, AuditStore, MemoryAuditStore};
use storefront_core::kv::{KvStore, MemoryKv};
use storefront_core::store::{StoreError, StoreResult};

use common::{Harness, SwitchableKv, access_token, get, test_config};

/// Never finishes a write.
struct StalledAuditStore;

#[async_trait]
impl AuditStore for StalledAuditStore {
    async fn insert(&self, _: &AuditEvent) -> StoreResult<()> {
        std::future::pending().await
    }
    async fn query(&self, _: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        Ok(Vec::new())
    }
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Fails every call.
struct OfflineAuditStore;

#[async_trait]
impl AuditStore for OfflineAuditStore {
    async fn insert(&self, _: &AuditEvent) -> StoreResult<()> {
        Err(StoreError::Unavailable("audit database down".into()))
    }
    async fn query(&self, _: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        Err(StoreError::Unavailable("audit database down".into()))
    }
    async fn ping(&self) -> StoreResult<()> {
        Err(StoreError::Unavailable("audit database down".into()))
    }
}

fn with_audit_store(store: Arc<dyn AuditStore>) -> Harness {
    let mut config = test_config();
    config.audit_queue_capacity = 2;
    config.audit_workers = 1;
    let kv = MemoryKv::new();
    Harness::assemble(config, Arc::new(kv.clone()), kv, store, MemoryAuditStore::new())
}

async fn exercise(h: &Harness) -> Vec<StatusCode> {
    let mut codes = Vec::new();
    codes.push(h.register("alice@x.io", "alice-password").await.status);
    codes.push(h.login("alice@x.io", "wrong-password").await.status);
    let login = h.login("alice@x.io", "alice-password").await;
    codes.push(login.status);
    let token = access_token(&login);
    for _ in 0..5 {
        codes.push(h.send(get("/api/auth/me").bearer(&token)).await.status);
    }
    codes.push(
        h.send(common::post("/api/auth/logout").bearer(&token))
            .await
            .status,
    );
    codes.push(h.send(get("/api/auth/me").bearer(&token)).await.status);
    codes
}

fn expected_codes() -> Vec<StatusCode> {
    let mut codes = vec![StatusCode::CREATED, StatusCode::UNAUTHORIZED, StatusCode::OK];
    codes.extend([StatusCode::OK; 5]);
    codes.push(StatusCode::OK);
    codes.push(StatusCode::UNAUTHORIZED);
    codes
}

#[tokio::test]
async fn stalled_audit_store_neither_blocks_nor_changes_responses() {
    let h = with_audit_store(Arc::new(StalledAuditStore));
    let started = Instant::now();
    let codes = tokio::time::timeout(Duration::from_secs(10), exercise(&h))
        .await
        .expect("requests blocked on the audit store");
    assert_eq!(codes, expected_codes());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(h.state.audit.dropped() > 0);

    let health = h.send(get("/api/health")).await;
    assert!(health.body["audit_dropped"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn failing_audit_store_does_not_change_responses() {
    let h = with_audit_store(Arc::new(OfflineAuditStore));
    assert_eq!(exercise(&h).await, expected_codes());
}

#[tokio::test]
async fn unreachable_kv_fails_open_for_revocation_checks() {
    let kv = MemoryKv::new();
    let switch = SwitchableKv::new(kv.clone());
    let h = Harness::build(test_config(), Arc::new(switch.clone()), kv);
    h.register("alice@x.io", "alice-password").await;
    let token = access_token(&h.login("alice@x.io", "alice-password").await);

    switch.set_offline(true);
    let me = h.send(get("/api/auth/me").bearer(&token)).await;
    assert_eq!(me.status, StatusCode::OK, "{}", me.body);
    assert!(h.state.kv_failures.count() > 0);

    // Issuing a session needs the store.
    let login = h.login("alice@x.io", "alice-password").await;
    assert_eq!(login.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(login.error(), "Service temporairement indisponible");

    let health = h.send(get("/api/health")).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["status"], "degraded");
    assert_eq!(health.body["kv"], false);
    assert_eq!(health.body["database"], true);
    assert!(health.body["kv_fail_open"].as_u64().unwrap() > 0);

    switch.set_offline(false);
    let health = h.send(get("/api/health")).await;
    assert_eq!(health.body["status"], "ok");
}

#[tokio::test]
async fn unreachable_kv_fails_closed_when_configured() {
    let mut config = test_config();
    config.revocation_fail_open = false;
    let kv = MemoryKv::new();
    let switch = SwitchableKv::new(kv.clone());
    let h = Harness::build(config, Arc::new(switch.clone()), kv);
    h.register("alice@x.io", "alice-password").await;
    let token = access_token(&h.login("alice@x.io", "alice-password").await);

    switch.set_offline(true);
    let me = h.send(get("/api/auth/me").bearer(&token)).await;
    assert_eq!(me.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn api_scope_throttles_per_client_address() {
    let mut config = test_config();
    config.rate_limits.apply_overrides("api=3/60").unwrap();
    config.trust_forwarded_headers = true;
    let h = Harness::with_config(config);
    h.seed_user("alice@x.io", "alice-password", "user").await;
    let login = h.login("alice@x.io", "alice-password").await;
    assert_eq!(login.headers["x-ratelimit-limit"], "3");
    let token = access_token(&login);

    let me = h.send(get("/api/auth/me").bearer(&token)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.headers["x-ratelimit-remaining"], "1");
    h.send(get("/api/auth/me").bearer(&token)).await;

    let limited = h.send(get("/api/auth/me").bearer(&token)).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = limited.headers[RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry));
    assert_eq!(limited.error(), "Trop de requêtes. Réessayez dans 1 minute");

    let elsewhere = h
        .send(get("/api/auth/me").bearer(&token).header("x-forwarded-for", "203.0.113.9"))
        .await;
    assert_eq!(elsewhere.status, StatusCode::OK);

    // Health sits outside the throttle.
    assert_eq!(h.send(get("/api/health")).await.status, StatusCode::OK);
}

fn register_call(email: &str) -> common::Call {
    common::post("/api/auth/register")
        .json(json!({ "email": email, "password": "long-enough-pw" }))
}

#[tokio::test]
async fn spoofed_forwarded_for_cannot_reset_the_register_budget() {
    let mut config = test_config();
    config.rate_limits.apply_overrides("register=2/60").unwrap();
    let h = Harness::with_config(config);
    let peer = "198.51.100.7:40000";

    for (i, spoofed) in ["203.0.113.1", "203.0.113.2"].iter().enumerate() {
        let call = register_call(&format!("user{i}@x.io"))
            .peer(peer)
            .header("x-forwarded-for", spoofed);
        let reply = h.send(call).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    }

    let blocked = h
        .send(register_call("user9@x.io").peer(peer).header("x-forwarded-for", "203.0.113.3"))
        .await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(h.kv.exists("register_cooldown:198.51.100.7").await.unwrap());

    let other_peer = h
        .send(register_call("user8@x.io").peer("198.51.100.8:40000"))
        .await;
    assert_eq!(other_peer.status, StatusCode::CREATED, "{}", other_peer.body);
}

#[tokio::test]
async fn forwarded_for_keys_the_register_budget_behind_a_trusted_proxy() {
    let mut config = test_config();
    config.rate_limits.apply_overrides("register=1/60").unwrap();
    config.trust_forwarded_headers = true;
    let h = Harness::with_config(config);
    let proxy = "10.0.0.2:443";

    let first = h
        .send(register_call("a@x.io").peer(proxy).header("x-forwarded-for", "203.0.113.1"))
        .await;
    assert_eq!(first.status, StatusCode::CREATED);
    let second = h
        .send(register_call("b@x.io").peer(proxy).header("x-forwarded-for", "203.0.113.2"))
        .await;
    assert_eq!(second.status, StatusCode::CREATED);
    let again = h
        .send(register_call("c@x.io").peer(proxy).header("x-forwarded-for", "203.0.113.1"))
        .await;
    assert_eq!(again.status, StatusCode::TOO_MANY_REQUESTS);
}
