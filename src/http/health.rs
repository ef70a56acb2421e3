//! `GET /health` and `GET /contact` (§6): unauthenticated, allowlist-exempt
//! endpoints. `/health` is always present; `/contact` is `404` if no
//! operator contact info is configured.

use axum::extract::State;
use axum::Json;
use relay_protocol::HealthResponse;

use crate::error::RelayError;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        uptime: state.uptime_seconds(),
        active_sessions: state.sessions.size().await,
    })
}

pub async fn contact(
    State(state): State<AppState>,
) -> Result<Json<relay_protocol::ContactResponse>, RelayError> {
    state
        .config
        .contact_response()
        .map(Json)
        .ok_or(RelayError::NotFound)
}
