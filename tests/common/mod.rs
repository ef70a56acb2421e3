//! Shared scaffolding for the integration suites: an in-memory database, a
//! background HTTP server standing in for the upstream caption ingestor, and
//! a relay instance bound to an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use caption_relay::config::{AllowedDomains, Config, ContactInfo};
use caption_relay::session::SessionStore;
use caption_relay::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub async fn fresh_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply cleanly");
    pool
}

/// A bare-bones stand-in for the upstream ingestion endpoint: every request
/// succeeds with a small JSON body, tracking how many requests it has seen
/// so tests can assert on delivery counts.
pub async fn spawn_fake_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/ingest", post(fake_upstream_handler))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

async fn fake_upstream_handler(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

pub struct TestConfig {
    pub admin_key: String,
}

/// Builds a relay bound to an ephemeral port, backed by `pool` and an
/// upstream at `upstream_url`. Returns the base URL and the admin key used
/// so callers can exercise admin-gated routes.
pub async fn spawn_relay(pool: SqlitePool, upstream_url: String) -> (String, TestConfig) {
    spawn_relay_with(pool, upstream_url, |_| {}).await
}

/// Like [`spawn_relay`] but lets the caller tweak the config before boot,
/// e.g. to restrict `allowed_domains` or disable `free_apikey_active`.
pub async fn spawn_relay_with(
    pool: SqlitePool,
    upstream_url: String,
    customize: impl FnOnce(&mut Config),
) -> (String, TestConfig) {
    let admin_key = "test-admin-key".to_owned();
    let mut config = Config {
        port: 0,
        jwt_secret: Some("test-jwt-secret".to_owned()),
        admin_key: Some(admin_key.clone()),
        db_path: std::path::PathBuf::from(":memory:"),
        session_ttl: Duration::from_secs(3600),
        cleanup_interval: Duration::from_secs(3600),
        allowed_domains: AllowedDomains::Any,
        usage_public: false,
        free_apikey_active: true,
        static_dir: None,
        contact: ContactInfo {
            name: None,
            email: None,
            phone: None,
            website: None,
        },
        revoked_key_ttl_days: 30,
        revoked_key_cleanup_interval: Duration::from_secs(86400),
        upstream_url,
    };
    customize(&mut config);

    let jwt_secret = caption_relay::auth::secret_or_random(&config.jwt_secret);
    let sessions = Arc::new(SessionStore::new(
        pool.clone(),
        config.upstream_url.clone(),
        config.session_ttl,
    ));
    let state = AppState::new(pool, config, sessions, jwt_secret);
    let router = caption_relay::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), TestConfig { admin_key })
}

/// Inserts a usable API key directly, bypassing the admin HTTP path so tests
/// can focus on the endpoint under test.
pub async fn seed_api_key(pool: &SqlitePool, key: &str) {
    caption_relay::repo::keys::create(pool, key, "test-owner", None, None, None, None)
        .await
        .expect("seed api key");
}

pub async fn seed_api_key_with_limits(
    pool: &SqlitePool,
    key: &str,
    daily_limit: Option<i64>,
    lifetime_limit: Option<i64>,
) {
    caption_relay::repo::keys::create(pool, key, "test-owner", None, None, daily_limit, lifetime_limit)
        .await
        .expect("seed api key");
}
