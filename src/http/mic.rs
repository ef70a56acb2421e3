//! `POST /mic` (§5, §6, §9): the advisory mic lock. Last-writer-wins; a
//! release by a non-holder is a no-op; every mutation emits `mic_state`.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use relay_protocol::{MicAction, MicRequest};

use crate::error::RelayError;
use crate::http::response::authenticate;
use crate::state::AppState;

pub async fn mic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MicRequest>,
) -> Result<StatusCode, RelayError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let (_, session) = authenticate(&state, authorization, None).await?;

    match body.action {
        MicAction::Claim => session.claim_mic(&body.client_id).await,
        MicAction::Release => session.release_mic(&body.client_id).await,
    }

    Ok(StatusCode::NO_CONTENT)
}
