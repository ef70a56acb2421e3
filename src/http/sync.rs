//! `POST /sync` (§6): refreshes the session's clock-offset estimate via an
//! upstream heartbeat round trip.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use relay_protocol::SyncResponse;

use crate::error::RelayError;
use crate::http::response::authenticate;
use crate::state::AppState;

pub async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SyncResponse>, RelayError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let (_, session) = authenticate(&state, authorization, None).await?;

    let result = session.upstream.sync().await?;
    session.set_sync_offset(result.sync_offset);

    Ok(Json(SyncResponse {
        sync_offset: result.sync_offset,
        round_trip_time: result.round_trip_time,
        server_timestamp: result.server_timestamp,
        status_code: result.status_code,
    }))
}
