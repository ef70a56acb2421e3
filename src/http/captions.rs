//! `POST /captions` (§4.5, §6): validates the submission, responds
//! immediately, and hands the resolved job to the session's delivery
//! worker. Usage-limit denials are asynchronous: they never change the
//! `202`, only what the event stream reports later.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use relay_protocol::{CaptionsAck, CaptionsRequest, StreamEventPayload, UsageCheckResult};
use uuid::Uuid;

use crate::delivery::{DeliveryJob, ResolvedCaption};
use crate::error::RelayError;
use crate::http::response::authenticate;
use crate::repo;
use crate::state::AppState;
use crate::upstream::resolve_timestamp;

pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CaptionsRequest>,
) -> Result<(StatusCode, Json<CaptionsAck>), RelayError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let (_, session) = authenticate(&state, authorization, None).await?;

    if body.captions.is_empty() {
        return Err(RelayError::Validation(
            "captions must be a non-empty array".to_owned(),
        ));
    }

    let correlation_id = Uuid::new_v4().to_string();

    let usage_result =
        repo::usage::check_and_increment(&state.pool, &session.api_key, body.captions.len() as i64)
            .await?;
    match usage_result {
        UsageCheckResult::Granted => {}
        UsageCheckResult::DailyLimitExceeded | UsageCheckResult::LifetimeLimitExceeded => {
            let reason = if usage_result == UsageCheckResult::DailyLimitExceeded {
                "daily_limit_exceeded"
            } else {
                "lifetime_limit_exceeded"
            };
            session
                .failed_count
                .fetch_add(body.captions.len() as u64, Ordering::SeqCst);
            let _ = repo::stats::insert_caption_error(
                &state.pool,
                &session.id,
                &session.api_key,
                reason,
                None,
            )
            .await;
            session.emit(StreamEventPayload::CaptionError {
                request_id: correlation_id.clone(),
                error: reason.to_owned(),
                status_code: None,
                sequence: Some(session.sequence.load(Ordering::SeqCst)),
            });
            return Ok((
                StatusCode::ACCEPTED,
                Json(CaptionsAck {
                    ok: true,
                    request_id: correlation_id,
                }),
            ));
        }
    }

    let resolved: Vec<ResolvedCaption> = body
        .captions
        .iter()
        .map(|c| ResolvedCaption {
            text: c.text.clone(),
            timestamp: resolve_timestamp(
                c.timestamp.as_deref(),
                c.time,
                session.started_at,
                session.sync_offset(),
            ),
        })
        .collect();

    session
        .enqueue(DeliveryJob {
            correlation_id: correlation_id.clone(),
            captions: resolved,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CaptionsAck {
            ok: true,
            request_id: correlation_id,
        }),
    ))
}
