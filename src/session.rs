//! Session store (§4.4). A map from session id to session plus a reverse
//! index by domain for dynamic CORS (§6, CORS policy), guarded by an
//! `RwLock` shared by handlers and the sweeper.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_protocol::StreamEventPayload;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::delivery::{self, DeliveryJob};
use crate::error::RelayError;
use crate::repo;
use crate::upstream::UpstreamClient;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DELIVERY_QUEUE_CAPACITY: usize = 64;

/// 16-hex-char derivation over key+stream-key+domain (§3, §4.4) so identical
/// credentials from the same origin collapse to one session and no
/// credential is ever stored in or derivable from the id.
pub fn make_session_id(api_key: &str, stream_key: &str, domain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(b"\0");
    hasher.update(stream_key.as_bytes());
    hasher.update(b"\0");
    hasher.update(domain.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

pub struct Session {
    pub id: String,
    pub api_key: String,
    pub stream_key: String,
    pub domain: String,
    pub token: String,
    pub started_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
    pub sequence: AtomicU64,
    sync_offset_ms: AtomicI64,
    pub delivered_count: AtomicU64,
    pub failed_count: AtomicU64,
    mic_holder: RwLock<Option<String>>,
    events: broadcast::Sender<StreamEventPayload>,
    delivery_tx: mpsc::Sender<DeliveryJob>,
    pub upstream: Arc<UpstreamClient>,
}

impl Session {
    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn sync_offset(&self) -> i64 {
        self.sync_offset_ms.load(Ordering::SeqCst)
    }

    pub fn set_sync_offset(&self, offset_ms: i64) {
        self.sync_offset_ms.store(offset_ms, Ordering::SeqCst);
    }

    pub async fn mic_holder(&self) -> Option<String> {
        self.mic_holder.read().await.clone()
    }

    /// Advisory lock: last-writer-wins, a release by a non-holder is a
    /// no-op, every mutation emits `mic_state` (§5, §9).
    pub async fn claim_mic(&self, client_id: &str) {
        *self.mic_holder.write().await = Some(client_id.to_owned());
        self.emit(StreamEventPayload::MicState {
            mic_holder: Some(client_id.to_owned()),
        });
    }

    pub async fn release_mic(&self, client_id: &str) {
        let mut holder = self.mic_holder.write().await;
        if holder.as_deref() != Some(client_id) {
            return;
        }
        *holder = None;
        drop(holder);
        self.emit(StreamEventPayload::MicState { mic_holder: None });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEventPayload> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: StreamEventPayload) {
        let _ = self.events.send(event);
    }

    /// Enqueues one delivery job. `NotFound` if the worker has already torn
    /// down (the channel is closed only once the session is being removed).
    pub async fn enqueue(&self, job: DeliveryJob) -> Result<(), RelayError> {
        self.delivery_tx
            .send(job)
            .await
            .map_err(|_| RelayError::NotFound)
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    by_domain: RwLock<HashMap<String, HashSet<String>>>,
    pool: SqlitePool,
    upstream_url: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(pool: SqlitePool, upstream_url: String, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            by_domain: RwLock::new(HashMap::new()),
            pool,
            upstream_url,
            ttl,
        }
    }

    /// Registers or recovers a session (§6 "idempotent for same (key,
    /// stream-key, domain)"). Returns the existing session, touched, if one
    /// is already live; otherwise creates and stores a new one.
    pub async fn register(
        &self,
        api_key: &str,
        stream_key: &str,
        domain: &str,
        token: impl FnOnce() -> Result<String, RelayError>,
        initial_sequence: Option<u64>,
    ) -> Result<(Arc<Session>, bool), RelayError> {
        let id = make_session_id(api_key, stream_key, domain);

        if let Some(existing) = self.get(&id).await {
            existing.touch();
            return Ok((existing, false));
        }

        let token = token()?;
        let upstream =
            Arc::new(UpstreamClient::new(&self.upstream_url, initial_sequence.unwrap_or(0))?);
        let (events_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);
        let now = Utc::now();

        let session = Arc::new(Session {
            id: id.clone(),
            api_key: api_key.to_owned(),
            stream_key: stream_key.to_owned(),
            domain: domain.to_owned(),
            token,
            started_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            sequence: AtomicU64::new(initial_sequence.unwrap_or(0)),
            sync_offset_ms: AtomicI64::new(0),
            delivered_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            mic_holder: RwLock::new(None),
            events: events_tx,
            delivery_tx,
            upstream,
        });

        delivery::spawn_worker(session.clone(), self.pool.clone(), delivery_rx);

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id.clone(), session.clone());
        }
        let domain_count = {
            let mut by_domain = self.by_domain.write().await;
            let set = by_domain.entry(domain.to_owned()).or_default();
            set.insert(id);
            set.len()
        };
        if let Err(e) =
            repo::rollups::observe_peak_sessions(&self.pool, domain, domain_count as i64).await
        {
            tracing::warn!(error = %e, domain = %domain, "failed to record peak_sessions roll-up");
        }

        Ok((session, true))
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn has(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn touch(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Removes a session from the store. Callers run the destruction path
    /// (§3 "Session lifecycle") over the returned record themselves.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = &removed {
            let domain_count = {
                let mut by_domain = self.by_domain.write().await;
                let remaining = match by_domain.get_mut(&session.domain) {
                    Some(set) => {
                        set.remove(id);
                        let remaining = set.len();
                        if set.is_empty() {
                            by_domain.remove(&session.domain);
                        }
                        remaining
                    }
                    None => 0,
                };
                remaining
            };
            if let Err(e) =
                repo::rollups::observe_peak_sessions(&self.pool, &session.domain, domain_count as i64)
                    .await
            {
                tracing::warn!(error = %e, domain = %session.domain, "failed to record peak_sessions roll-up");
            }
        }
        removed
    }

    pub async fn get_by_domain(&self, domain: &str) -> Vec<Arc<Session>> {
        let Some(ids) = self.by_domain.read().await.get(domain).cloned() else {
            return Vec::new();
        };
        let sessions = self.sessions.read().await;
        ids.iter().filter_map(|id| sessions.get(id).cloned()).collect()
    }

    pub async fn domain_has_session(&self, domain: &str) -> bool {
        self.by_domain
            .read()
            .await
            .get(domain)
            .is_some_and(|set| !set.is_empty())
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn size(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Destruction path shared by explicit teardown, TTL expiry, and erasure
/// (§3 "Session lifecycle", §4.7): best-effort upstream close, a summary
/// row, an hourly roll-up, and a terminal `session_closed` event.
pub async fn finalize_session(pool: &SqlitePool, session: &Session, ended_by: &str) {
    session.upstream.end().await;

    let ended_at = Utc::now();
    if let Err(e) = repo::stats::insert_session_summary(
        pool,
        &session.id,
        &session.api_key,
        &session.domain,
        session.started_at,
        ended_at,
        ended_by,
        session.delivered_count.load(Ordering::SeqCst) as i64,
        session.failed_count.load(Ordering::SeqCst) as i64,
    )
    .await
    {
        tracing::warn!(error = %e, session_id = %session.id, "failed to write session summary row");
    }
    if let Err(e) =
        repo::rollups::increment(pool, &session.domain, repo::rollups::Counter::SessionsEnded).await
    {
        tracing::warn!(error = %e, session_id = %session.id, "failed to record sessions_ended roll-up");
    }

    session.emit(StreamEventPayload::SessionClosed {
        ended_by: ended_by.to_owned(),
    });
}

/// Periodic sweep (§4.4, §4.7): removes sessions idle beyond `ttl` and
/// finalizes each with `ended_by="ttl"`. Independent task synchronized with
/// the rest of the lifecycle by a single shared `CancellationToken` (§9).
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    sweep_interval: Duration,
    ttl: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => sweep_once(&store, ttl).await,
            }
        }
    })
}

async fn sweep_once(store: &SessionStore, ttl: Duration) {
    let now = Utc::now();
    let expired: Vec<String> = store
        .all()
        .await
        .into_iter()
        .filter(|session| {
            now.signed_duration_since(session.last_activity())
                .to_std()
                .map(|idle| idle >= ttl)
                .unwrap_or(false)
        })
        .map(|session| session.id.clone())
        .collect();

    if expired.is_empty() {
        return;
    }
    tracing::info!(count = expired.len(), "sweeping idle sessions");
    for id in expired {
        if let Some(session) = store.remove(&id).await {
            finalize_session(store.pool(), &session, "ttl").await;
        }
    }
}
