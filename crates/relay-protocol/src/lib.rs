//! Wire types shared between the relay server and its test suites.
//!
//! Kept in its own crate so that HTTP handlers, the delivery engine, and
//! integration tests all deserialize/serialize against the same structs
//! instead of hand-rolling `serde_json::json!` bodies at each call site.

use serde::{Deserialize, Serialize};

/// Standard error body for every non-2xx JSON response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpErrorEnvelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl HttpErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
        }
    }
}

/// `POST /live` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub api_key: String,
    pub stream_key: String,
    pub domain: String,
    #[serde(default)]
    pub sequence: Option<u64>,
}

/// `POST /live` success body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub token: String,
    pub session_id: String,
    pub sequence: u64,
    pub sync_offset: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// `GET /live` success body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub sequence: u64,
    pub sync_offset: i64,
}

/// `PATCH /live` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SetSequenceRequest {
    pub sequence: u64,
}

/// One caption item inside a `POST /captions` submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptionItem {
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
}

/// `POST /captions` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionsRequest {
    pub captions: Vec<CaptionItem>,
}

/// `POST /captions` acknowledgement body. Advisory only, see §4.5.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionsAck {
    pub ok: bool,
    pub request_id: String,
}

/// `POST /sync` success body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub sync_offset: i64,
    pub round_trip_time: i64,
    pub server_timestamp: String,
    pub status_code: u16,
}

/// `POST /mic` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicAction {
    Claim,
    Release,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicRequest {
    pub action: MicAction,
    pub client_id: String,
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub uptime: u64,
    pub active_sessions: usize,
}

/// `GET /contact` body.
#[derive(Debug, Clone, Serialize)]
pub struct ContactResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Events delivered over the `GET /events` stream (§4.6).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum StreamEventPayload {
    Connected {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mic_holder: Option<String>,
    },
    CaptionResult {
        request_id: String,
        sequence: u64,
        server_timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
    },
    CaptionError {
        request_id: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    MicState {
        mic_holder: Option<String>,
    },
    SessionClosed {
        ended_by: String,
    },
}

impl StreamEventPayload {
    /// The `event:` field of the SSE frame (§6 "Event stream frames").
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::CaptionResult { .. } => "caption_result",
            Self::CaptionError { .. } => "caption_error",
            Self::MicState { .. } => "mic_state",
            Self::SessionClosed { .. } => "session_closed",
        }
    }
}

/// Usage-check outcomes from the key & usage store (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCheckResult {
    Granted,
    DailyLimitExceeded,
    LifetimeLimitExceeded,
}

/// Key validity outcomes (§4.2 `validate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValidity {
    Ok,
    UnknownKey,
    Revoked,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_payload_picks_bit_exact_event_names() {
        assert_eq!(
            StreamEventPayload::Connected {
                session_id: "s".into(),
                mic_holder: None
            }
            .event_name(),
            "connected"
        );
        assert_eq!(
            StreamEventPayload::CaptionResult {
                request_id: "r".into(),
                sequence: 1,
                server_timestamp: "t".into(),
                count: None
            }
            .event_name(),
            "caption_result"
        );
        assert_eq!(
            StreamEventPayload::SessionClosed {
                ended_by: "client".into()
            }
            .event_name(),
            "session_closed"
        );
    }

    #[test]
    fn captions_request_defaults_timestamp_and_time_to_none() {
        let parsed: CaptionsRequest = serde_json::from_str(r#"{"captions":[{"text":"hi"}]}"#)
            .expect("valid body");
        assert_eq!(parsed.captions.len(), 1);
        assert_eq!(parsed.captions[0].text, "hi");
        assert!(parsed.captions[0].timestamp.is_none());
        assert!(parsed.captions[0].time.is_none());
    }

    #[test]
    fn http_error_envelope_omits_code_when_absent() {
        let env = HttpErrorEnvelope::new("boom");
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }
}
