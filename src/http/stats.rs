//! `GET|DELETE /stats` (§6): per-key usage reporting and the erasure path
//! for the caller's own key.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::error::RelayError;
use crate::http::response::authenticate;
use crate::repo;
use crate::state::AppState;

const RECENT_LIMIT: i64 = 20;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub daily_usage: i64,
    pub sessions: Vec<repo::stats::SessionStatRow>,
    pub errors: Vec<repo::stats::CaptionErrorRow>,
    pub auth_events: Vec<repo::stats::AuthEventRow>,
}

pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, RelayError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let (claims, _session) = authenticate(&state, authorization, None).await?;

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let daily_usage = repo::usage::daily_count(&state.pool, &claims.api_key, &today).await?;
    let sessions = repo::stats::recent_sessions(&state.pool, &claims.api_key, RECENT_LIMIT).await?;
    let errors = repo::stats::recent_errors(&state.pool, &claims.api_key, RECENT_LIMIT).await?;
    let auth_events =
        repo::stats::recent_auth_events(&state.pool, &claims.api_key, RECENT_LIMIT).await?;

    Ok(Json(StatsResponse {
        daily_usage,
        sessions,
        errors,
        auth_events,
    }))
}

/// Erasure (§3, §4.2, §8 scenario 6): anonymises the caller's key in place.
/// The key row and email remain until the key's original expiry.
pub async fn erase(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, RelayError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let (claims, _session) = authenticate(&state, authorization, None).await?;

    repo::keys::anonymise(&state.pool, &claims.api_key).await?;
    Ok(StatusCode::NO_CONTENT)
}
