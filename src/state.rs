//! Shared application state (§4.7, §4.9). Bundles the persistence pool, the
//! resolved configuration, and the session store behind one `Clone`-able
//! handle.

use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub jwt_secret: Arc<String>,
    boot_instant: Arc<Instant>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        sessions: Arc<SessionStore>,
        jwt_secret: String,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            sessions,
            jwt_secret: Arc::new(jwt_secret),
            boot_instant: Arc::new(Instant::now()),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.boot_instant.elapsed().as_secs()
    }
}
