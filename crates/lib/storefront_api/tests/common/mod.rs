//! Shared harness for the router-level tests: in-memory backends, a
//! request builder and JSON reply decoding.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use serde_json::{Value, json};
use storefront_api::config::ApiConfig;
use storefront_api::middleware::meta::DEVICE_ID_HEADER;
use storefront_api::{AppState, router};
use storefront_core::audit::{AuditEvent, AuditStore, MemoryAuditStore};
use storefront_core::auth::password::Argon2Params;
use storefront_core::kv::{KvError, KvResult, KvStore, MemoryKv};
use storefront_core::mail::{MailError, Mailer};
use storefront_core::models::auth::{ADMIN_ROLE, NewPrincipal, Principal};
use storefront_core::models::rbac::NewAssignment;
use storefront_core::rbac::catalog::seed_default_roles;
use storefront_core::store::{MemoryUserStore, UserStore};
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret-0123456789abcdef";

/// Cheap hashing and a register limit that does not get in the way.
pub fn test_config() -> ApiConfig {
    let mut config = ApiConfig::new(SECRET);
    config.argon2 = Argon2Params {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };
    config
        .rate_limits
        .apply_overrides("register=1000/60")
        .unwrap();
    config
}

pub struct Harness {
    pub state: AppState,
    pub app: Router,
    pub users: MemoryUserStore,
    pub audit: MemoryAuditStore,
    pub kv: MemoryKv,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ApiConfig) -> Self {
        let kv = MemoryKv::new();
        Self::build(config, Arc::new(kv.clone()), kv)
    }

    /// Route KV traffic through `shared` while keeping `kv` for inspection.
    pub fn build(config: ApiConfig, shared: Arc<dyn KvStore>, kv: MemoryKv) -> Self {
        let audit = MemoryAuditStore::new();
        Self::assemble(config, shared, kv, Arc::new(audit.clone()), audit)
    }

    pub fn assemble(
        config: ApiConfig,
        shared: Arc<dyn KvStore>,
        kv: MemoryKv,
        audit_log: Arc<dyn AuditStore>,
        audit: MemoryAuditStore,
    ) -> Self {
        let users = MemoryUserStore::new();
        let state = AppState::new(config, Arc::new(users.clone()), audit_log, shared);
        Self::from_state(state, users, audit, kv)
    }

    pub fn from_state(
        state: AppState,
        users: MemoryUserStore,
        audit: MemoryAuditStore,
        kv: MemoryKv,
    ) -> Self {
        Self {
            app: router(state.clone()),
            state,
            users,
            audit,
            kv,
        }
    }

    pub async fn send(&self, call: Call) -> Reply {
        send_to(&self.app, call).await
    }

    pub async fn register(&self, email: &str, password: &str) -> Reply {
        let reply = self
            .send(post("/api/auth/register").json(json!({ "email": email, "password": password })))
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply
    }

    pub async fn login(&self, email: &str, password: &str) -> Reply {
        self.send(post("/api/auth/login").json(json!({ "email": email, "password": password })))
            .await
    }

    pub async fn login_on(&self, device: &str, email: &str, password: &str) -> Reply {
        self.send(
            post("/api/auth/login")
                .device(device)
                .json(json!({ "email": email, "password": password })),
        )
        .await
    }

    /// Insert a principal directly, bypassing registration.
    pub async fn seed_user(&self, email: &str, password: &str, role: &str) -> Principal {
        let hash = self.state.hasher.hash(password).unwrap();
        let mut new = NewPrincipal::local(email, None, hash);
        new.role = role.to_string();
        self.users.create_principal(new).await.unwrap()
    }

    pub async fn seed_legacy_admin(&self, email: &str, password: &str) -> String {
        self.seed_user(email, password, ADMIN_ROLE).await;
        access_token(&self.login(email, password).await)
    }

    /// A user holding the seeded `super_admin` role, signed in.
    pub async fn seed_super_admin(&self, email: &str, password: &str) -> String {
        seed_default_roles(&self.users).await.unwrap();
        let user = self.seed_user(email, password, "user").await;
        let role = self
            .users
            .find_role_by_name("super_admin")
            .await
            .unwrap()
            .unwrap();
        self.users
            .assign_role(NewAssignment {
                user_id: user.id,
                role_id: role.id,
                granted_by: None,
                expires_at: None,
            })
            .await
            .unwrap();
        access_token(&self.login(email, password).await)
    }

    /// Poll the audit store until an event with `action` shows up.
    pub async fn audited(&self, action: &str) -> AuditEvent {
        for _ in 0..200 {
            if let Some(event) = self.audit.all().await.into_iter().find(|e| e.action == action) {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no audit event {action}");
    }
}

pub async fn send_to(app: &Router, call: Call) -> Reply {
    let response = app.clone().oneshot(call.build()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    Reply {
        status,
        headers,
        body,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

pub fn access_token(reply: &Reply) -> String {
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    reply.body["access_token"].as_str().unwrap().to_string()
}

pub fn refresh_token(reply: &Reply) -> String {
    reply.body["refresh_token"].as_str().unwrap().to_string()
}

pub struct Call {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    peer: Option<SocketAddr>,
}

pub fn get(uri: &str) -> Call {
    Call::new(Method::GET, uri)
}

pub fn post(uri: &str) -> Call {
    Call::new(Method::POST, uri)
}

pub fn delete(uri: &str) -> Call {
    Call::new(Method::DELETE, uri)
}

impl Call {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            headers: Vec::new(),
            body: None,
            peer: None,
        }
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), &format!("Bearer {token}"))
    }

    pub fn device(self, device: &str) -> Self {
        self.header(DEVICE_ID_HEADER, device)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(self, body: Value) -> Self {
        self.raw_json(&body.to_string())
    }

    /// Socket address the request appears to come from.
    pub fn peer(mut self, addr: &str) -> Self {
        self.peer = Some(addr.parse().unwrap());
        self
    }

    /// Sends `body` verbatim as `application/json`.
    pub fn raw_json(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    fn build(self) -> Request<Body> {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(peer) = self.peer {
            builder = builder.extension(ConnectInfo(peer));
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match self.body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }
}

/// Memory store that can be taken offline mid-test.
#[derive(Clone)]
pub struct SwitchableKv {
    inner: MemoryKv,
    offline: Arc<AtomicBool>,
}

impl SwitchableKv {
    pub fn new(inner: MemoryKv) -> Self {
        Self {
            inner,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> KvResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(KvError::Unavailable("switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for SwitchableKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }
    async fn del(&self, key: &str) -> KvResult<bool> {
        self.check()?;
        self.inner.del(key).await
    }
    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.check()?;
        self.inner.exists(key).await
    }
    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        self.check()?;
        self.inner.ttl(key).await
    }
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> KvResult<i64> {
        self.check()?;
        self.inner.incr_with_ttl(key, ttl).await
    }
    async fn scan_prefix(&self, prefix: &str) -> KvResult<Vec<String>> {
        self.check()?;
        self.inner.scan_prefix(prefix).await
    }
    async fn ping(&self) -> KvResult<()> {
        self.check()?;
        self.inner.ping().await
    }
    fn backend_name(&self) -> &'static str {
        "switchable"
    }
}

/// Records reset links instead of mailing them.
#[derive(Clone, Default)]
pub struct CapturingMailer {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl CapturingMailer {
    pub async fn wait_for_link(&self) -> String {
        for _ in 0..200 {
            if let Some((_, link)) = self.sent.lock().unwrap().last().cloned() {
                return link;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no reset mail sent");
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), reset_link.to_string()));
        Ok(())
    }
}
