use std::sync::Arc;
use std::time::Duration;

use caption_relay::config::Config;
use caption_relay::session::SessionStore;
use caption_relay::{auth, db, repo, AppState};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = Config::from_env().expect("invalid configuration");
    config.log_boot_state();

    info!("connecting to database...");
    let pool = db::create_pool(&config.db_path)
        .await
        .expect("failed to open database");
    db::run_migrations(&pool).await.expect("failed to run migrations");
    info!("migrations applied");

    let jwt_secret = auth::secret_or_random(&config.jwt_secret);
    let sessions = Arc::new(SessionStore::new(
        pool.clone(),
        config.upstream_url.clone(),
        config.session_ttl,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = caption_relay::session::spawn_sweeper(
        sessions.clone(),
        config.cleanup_interval,
        config.session_ttl,
        shutdown.clone(),
    );
    let key_cleanup = spawn_revoked_key_cleanup(
        pool.clone(),
        config.revoked_key_ttl_days,
        config.revoked_key_cleanup_interval,
        shutdown.clone(),
    );

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(pool, config, sessions.clone(), jwt_secret);
    let router = caption_relay::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "relay listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("server error");

    info!("shutting down: closing live sessions");
    for session in sessions.all().await {
        session.upstream.end().await;
    }
    sweeper.abort();
    key_cleanup.abort();
    info!("relay shut down gracefully");
}

fn spawn_revoked_key_cleanup(
    pool: sqlx::SqlitePool,
    ttl_days: i64,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match repo::keys::clean_revoked(&pool, ttl_days, false).await {
                        Ok(count) if count > 0 => {
                            info!(count, "purged long-revoked API keys");
                        }
                        Ok(_) => {}
                        Err(error) => {
                            tracing::warn!(%error, "revoked-key cleanup failed");
                        }
                    }
                }
            }
        }
    })
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), then fires the shared cancellation
/// token so the sweeper and cleanup tasks stop alongside the HTTP server.
async fn shutdown_signal(shutdown: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
