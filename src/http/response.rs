//! Shared HTTP-layer helpers: bearer authentication, the default
//! cache-forbidding response header (§4.8), and the 404 fallback body.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_protocol::HttpErrorEnvelope;

use crate::auth::{self, TokenClaims};
use crate::error::RelayError;
use crate::session::Session;
use crate::state::AppState;

/// Resolves a bearer token (header or query fallback, per §4.3) into its
/// claims and the live session it names. Touches the session on every
/// authenticated request (§3 "last-activity is updated by every
/// authenticated touch").
pub async fn authenticate(
    state: &AppState,
    authorization: Option<&str>,
    query_token: Option<&str>,
) -> Result<(TokenClaims, Arc<Session>), RelayError> {
    let token = auth::extract_bearer(authorization, query_token)
        .ok_or(RelayError::Auth(crate::error::AuthFailure::MissingToken))?;
    let claims = auth::verify_token(&state.jwt_secret, &token)?;
    let session = state
        .sessions
        .get(&claims.session_id)
        .await
        .ok_or(RelayError::NotFound)?;
    session.touch();
    Ok((claims, session))
}

/// Default response header: forbids caching unless a handler opts out by
/// setting its own `Cache-Control` (§4.8).
pub async fn no_cache_header(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .entry(header::CACHE_CONTROL)
        .or_insert_with(|| HeaderValue::from_static("no-store"));
    response
}

pub async fn fallback_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(HttpErrorEnvelope::new("not found")),
    )
}
