//! The upstream caption client (§4.1). Builds wire bodies for the
//! third-party ingestion endpoint and POSTs them; holds no session state of
//! its own beyond the upstream-mandated sequence counter. One instance is
//! owned exclusively by one session (§3 "Ownership").

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL: {0}")]
    Config(String),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error talking to upstream: {0}")]
    Network(String),
}

pub struct CaptionSend {
    pub sequence: u64,
    pub server_timestamp: String,
    pub status_code: u16,
}

pub struct BatchSend {
    pub sequence: u64,
    pub count: usize,
    pub server_timestamp: String,
    pub status_code: u16,
}

pub struct Heartbeat {
    pub sequence: u64,
    pub server_timestamp: String,
}

pub struct SyncResult {
    pub sync_offset: i64,
    pub round_trip_time: i64,
    pub server_timestamp: String,
    pub status_code: u16,
}

/// One caption item as the upstream client sees it, after the HTTP layer
/// has already resolved `time`/`timestamp` precedence (§4.5 step 2).
pub struct OutboundCaption {
    pub text: String,
    /// `Some` when the caller supplied an explicit timestamp; `None` means
    /// "auto-stamp" (§4.1 batch auto-stamping).
    pub timestamp: Option<String>,
    pub region: Option<(String, String)>,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: String,
    sequence: AtomicU64,
}

impl UpstreamClient {
    pub fn new(endpoint: impl Into<String>, starting_sequence: u64) -> Result<Self, UpstreamError> {
        let endpoint = endpoint.into();
        let parsed = reqwest::Url::parse(&endpoint)
            .map_err(|e| UpstreamError::Config(format!("{endpoint}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(UpstreamError::Config(format!(
                "unsupported scheme in upstream URL: {endpoint}"
            )));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| UpstreamError::Config(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            sequence: AtomicU64::new(starting_sequence),
        })
    }

    pub fn get_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn set_sequence(&self, n: u64) {
        self.sequence.store(n, Ordering::SeqCst);
    }

    /// Arms the client. This client has no handshake, so `start` is a no-op
    /// kept for interface parity with §4.1.
    pub fn start(&self) {}

    pub async fn send(
        &self,
        caption: &OutboundCaption,
    ) -> Result<CaptionSend, UpstreamError> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let body = format_body(std::slice::from_ref(caption), Utc::now());
        let (status, server_timestamp) = self.post(seq, &body).await?;
        Ok(CaptionSend {
            sequence: seq,
            server_timestamp,
            status_code: status,
        })
    }

    /// A batch of N>1 items is atomic from the upstream's view: it consumes
    /// exactly one sequence slot (§4.1).
    pub async fn send_batch(
        &self,
        captions: &[OutboundCaption],
    ) -> Result<BatchSend, UpstreamError> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let body = format_body(captions, Utc::now());
        let (status, server_timestamp) = self.post(seq, &body).await?;
        Ok(BatchSend {
            sequence: seq,
            count: captions.len(),
            server_timestamp,
            status_code: status,
        })
    }

    /// Heartbeats do NOT consume a sequence slot (§4.1).
    pub async fn heartbeat(&self) -> Result<Heartbeat, UpstreamError> {
        let seq = self.sequence.load(Ordering::SeqCst);
        let url = format!("{}?seq={}&heartbeat=1", self.endpoint, seq);
        let response = self
            .http
            .post(&url)
            .body("")
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        let status = response.status();
        let server_timestamp = response_timestamp(&response);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Heartbeat {
            sequence: seq,
            server_timestamp,
        })
    }

    /// Measures one-way clock offset via a heartbeat round trip (§4.1).
    pub async fn sync(&self) -> Result<SyncResult, UpstreamError> {
        let send_time = Utc::now();
        let hb = self.heartbeat().await?;
        let receive_time = Utc::now();
        let round_trip_time = (receive_time - send_time).num_milliseconds();

        let server_time = DateTime::parse_from_rfc3339(&hb.server_timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(receive_time);
        let estimated_request_arrival = send_time + chrono::Duration::milliseconds(round_trip_time / 2);
        let sync_offset = (server_time - estimated_request_arrival).num_milliseconds();

        Ok(SyncResult {
            sync_offset,
            round_trip_time,
            server_timestamp: hb.server_timestamp,
            status_code: 200,
        })
    }

    /// Best-effort close; failures here never block session destruction (§7).
    pub async fn end(&self) {
        let seq = self.sequence.load(Ordering::SeqCst);
        let url = format!("{}?seq={}&end=1", self.endpoint, seq);
        if let Err(e) = self.http.post(&url).body("").send().await {
            tracing::debug!(error = %e, "best-effort upstream close failed");
        }
    }

    async fn post(&self, seq: u64, body: &str) -> Result<(u16, String), UpstreamError> {
        let url = format!("{}?seq={}", self.endpoint, seq);
        let response = self
            .http
            .post(&url)
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        let status = response.status();
        let server_timestamp = response_timestamp(&response);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok((status.as_u16(), server_timestamp))
    }
}

fn response_timestamp(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("date")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339())
}

/// Renders the wire body for one request: one line per caption, joined by
/// newlines (§4.1). Batches that omit per-item timestamps auto-stamp the
/// i-th item at `now + 100ms * i` to keep ordering strict.
fn format_body(captions: &[OutboundCaption], now: DateTime<Utc>) -> String {
    captions
        .iter()
        .enumerate()
        .map(|(i, caption)| {
            let stamp = match &caption.timestamp {
                Some(ts) => pass_through_or_reformat(ts),
                None => {
                    let auto = now + chrono::Duration::milliseconds(100 * i as i64);
                    render_timestamp(auto)
                }
            };
            let header = match &caption.region {
                Some((region, cue)) => format!("{stamp} region:{region}#{cue}"),
                None => stamp,
            };
            format!("{header}\n{}", caption.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// If a caller provides an already-formatted (no trailing `Z`) timestamp it
/// is used verbatim; otherwise it is parsed and re-emitted in the required
/// form. The wire format never documents a trailing `Z`, so this branch is
/// effectively a passthrough kept for §9 Open Questions pending operator
/// confirmation.
fn pass_through_or_reformat(ts: &str) -> String {
    if !ts.ends_with('Z') {
        return ts.to_owned();
    }
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| render_timestamp(dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| ts.to_owned())
}

/// `YYYY-MM-DDTHH:MM:SS.mmm`, no timezone suffix, millisecond precision.
fn render_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Resolves a caption submission's effective timestamp per §4.5 step 2:
/// `timestamp` wins when both are present; otherwise `time` (ms since
/// `started_at`) plus `sync_offset` resolves to an absolute instant.
pub fn resolve_timestamp(
    timestamp: Option<&str>,
    time_ms: Option<i64>,
    started_at: DateTime<Utc>,
    sync_offset_ms: i64,
) -> Option<String> {
    if let Some(ts) = timestamp {
        return Some(ts.to_owned());
    }
    time_ms.map(|ms| {
        let instant = started_at + chrono::Duration::milliseconds(ms + sync_offset_ms);
        render_timestamp(instant)
    })
}
