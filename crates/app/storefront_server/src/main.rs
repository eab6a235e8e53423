//! Storefront auth API server binary.
//!
//! Reads configuration from the environment (and `.env`), runs migrations,
//! seeds the default roles and serves the HTTP API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use storefront_api::config::ApiConfig;
use storefront_api::{AppState, router};
use storefront_core::audit::PgAuditStore;
use storefront_core::kv::{self, MemoryKv, SharedKv, TimedKv};
use storefront_core::models::auth::normalize_email;
use storefront_core::models::rbac::NewAssignment;
use storefront_core::rbac::catalog::seed_default_roles;
use storefront_core::store::{PgUserStore, StoreError, UserStore};
use tracing::{info, warn};

/// How often the in-process KV store drops expired keys.
const KV_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// CLI arguments. Each flag overrides its environment variable.
#[derive(Parser, Debug)]
#[command(name = "storefront_server", about = "Storefront session and authorization API")]
struct Args {
    /// Port to listen on. Overrides `BIND_ADDR` / `PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL for the user store.
    #[arg(long)]
    database_url: Option<String>,

    /// Maximum number of database connections per pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// `memory://` or `redis://host:port`.
    #[arg(long)]
    kv_url: Option<String>,

    /// Grant the `super_admin` role to this existing account at start-up.
    #[arg(long, value_name = "EMAIL")]
    bootstrap_admin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,storefront_api=debug,storefront_core=debug,tower_http=info".into()
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env()?;
    if let Some(port) = args.port {
        config.bind_addr = format!("0.0.0.0:{port}");
    }
    if let Some(url) = args.database_url {
        if config.audit_database_url == config.database_url {
            config.audit_database_url = url.clone();
        }
        config.database_url = url;
    }
    if let Some(url) = args.kv_url {
        config.kv_url = url;
    }

    info!(
        bind_addr = %config.bind_addr,
        kv_url = %config.kv_url,
        max_connections = args.max_connections,
        "starting storefront_server"
    );

    let pool = connect_pool(&config.database_url, args.max_connections).await?;
    info!("running database migrations");
    storefront_api::migrate(&pool).await?;

    let audit_pool = if config.audit_database_url == config.database_url {
        pool.clone()
    } else {
        let audit_pool = connect_pool(&config.audit_database_url, args.max_connections).await?;
        storefront_api::migrate(&audit_pool).await?;
        audit_pool
    };

    let users = Arc::new(PgUserStore::with_timeout(pool, config.db_timeout));
    let seeded = seed_default_roles(users.as_ref()).await?;
    info!(seeded, "default roles checked");

    if let Some(email) = &args.bootstrap_admin {
        bootstrap_admin(users.as_ref(), email).await?;
    }

    let kv = open_kv(&config).await?;
    let audit_log = Arc::new(PgAuditStore::with_timeout(audit_pool, config.db_timeout));

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, users, audit_log, kv);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
}

/// Open the configured KV backend behind the per-call deadline.
async fn open_kv(config: &ApiConfig) -> Result<SharedKv, kv::KvError> {
    if config.kv_url.starts_with("memory:") {
        warn!("using the in-process key-value store; state is lost on restart");
        let memory = MemoryKv::new();
        memory.spawn_sweeper(KV_SWEEP_INTERVAL);
        return Ok(Arc::new(TimedKv::new(Arc::new(memory), config.kv_timeout)));
    }
    let inner = kv::connect(&config.kv_url).await?;
    info!(backend = inner.backend_name(), "key-value store connected");
    Ok(Arc::new(TimedKv::new(inner, config.kv_timeout)))
}

async fn bootstrap_admin(users: &dyn UserStore, email: &str) -> Result<(), StoreError> {
    let email = normalize_email(email);
    let user = users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("bootstrap admin {email}")))?;
    let role = users
        .find_role_by_name("super_admin")
        .await?
        .ok_or_else(|| StoreError::NotFound("role super_admin".into()))?;
    match users
        .assign_role(NewAssignment {
            user_id: user.id.clone(),
            role_id: role.id,
            granted_by: None,
            expires_at: None,
        })
        .await
    {
        Ok(_) => info!(user_id = %user.id, "granted super_admin"),
        Err(StoreError::Conflict(_)) => info!(user_id = %user.id, "already super_admin"),
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
