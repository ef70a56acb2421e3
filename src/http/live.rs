//! `POST|GET|PATCH|DELETE /live` (§6): session registration, status, manual
//! sequence override, and explicit teardown.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use relay_protocol::{RegisterRequest, RegisterResponse, SessionStatusResponse, SetSequenceRequest};

use crate::auth;
use crate::error::{AuthFailure, RelayError};
use crate::http::response::authenticate;
use crate::repo::{self, rollups::Counter};
use crate::session::make_session_id;
use crate::state::AppState;

fn bearer_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), RelayError> {
    if body.api_key.trim().is_empty() || body.stream_key.trim().is_empty() || body.domain.trim().is_empty()
    {
        return Err(RelayError::Validation(
            "apiKey, streamKey, and domain are required".to_owned(),
        ));
    }

    if !state.config.allowed_domains.allows(&body.domain) {
        let _ = repo::stats::insert_auth_event(
            &state.pool,
            Some(&body.api_key),
            "domain_not_allowed",
            Some(&body.domain),
        )
        .await;
        return Err(RelayError::Auth(AuthFailure::DomainNotAllowed));
    }

    match repo::keys::validate(&state.pool, &body.api_key).await? {
        relay_protocol::KeyValidity::Ok => {}
        relay_protocol::KeyValidity::UnknownKey => {
            let _ = repo::stats::insert_auth_event(
                &state.pool,
                Some(&body.api_key),
                "unknown_key",
                Some(&body.domain),
            )
            .await;
            return Err(RelayError::Auth(AuthFailure::UnknownKey));
        }
        relay_protocol::KeyValidity::Revoked => {
            let _ = repo::stats::insert_auth_event(
                &state.pool,
                Some(&body.api_key),
                "revoked",
                Some(&body.domain),
            )
            .await;
            return Err(RelayError::Auth(AuthFailure::Revoked));
        }
        relay_protocol::KeyValidity::Expired => {
            let _ = repo::stats::insert_auth_event(
                &state.pool,
                Some(&body.api_key),
                "expired",
                Some(&body.domain),
            )
            .await;
            return Err(RelayError::Auth(AuthFailure::Expired));
        }
    }

    let secret = state.jwt_secret.clone();
    let api_key = body.api_key.clone();
    let stream_key = body.stream_key.clone();
    let domain = body.domain.clone();

    let (session, created) = state
        .sessions
        .register(
            &body.api_key,
            &body.stream_key,
            &body.domain,
            move || {
                let id = make_session_id(&api_key, &stream_key, &domain);
                auth::issue_token(&secret, &id, &api_key, &stream_key, &domain)
            },
            body.sequence,
        )
        .await?;

    if created {
        repo::rollups::increment(&state.pool, &session.domain, Counter::SessionsStarted).await?;
    }

    Ok((
        StatusCode::OK,
        Json(RegisterResponse {
            token: session.token.clone(),
            session_id: session.id.clone(),
            sequence: session.sequence.load(Ordering::SeqCst),
            sync_offset: session.sync_offset(),
            started_at: session.started_at,
        }),
    ))
}

pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionStatusResponse>, RelayError> {
    let (_, session) = authenticate(&state, bearer_header(&headers), None).await?;
    Ok(Json(SessionStatusResponse {
        sequence: session.sequence.load(Ordering::SeqCst),
        sync_offset: session.sync_offset(),
    }))
}

pub async fn set_sequence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SetSequenceRequest>,
) -> Result<StatusCode, RelayError> {
    let (_, session) = authenticate(&state, bearer_header(&headers), None).await?;
    session.sequence.store(body.sequence, Ordering::SeqCst);
    session.upstream.set_sequence(body.sequence);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn teardown(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, RelayError> {
    let (_, session) = authenticate(&state, bearer_header(&headers), None).await?;
    if let Some(removed) = state.sessions.remove(&session.id).await {
        crate::session::finalize_session(&state.pool, &removed, "client").await;
    }
    Ok(StatusCode::NO_CONTENT)
}
