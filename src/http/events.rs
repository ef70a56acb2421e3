//! `GET /events` (§4.6): the per-subscriber event stream. A `BroadcastStream`
//! adapted into an axum SSE response with a keep-alive, prefixed with a
//! synthetic `connected` frame since each subscriber, not the session, owns
//! that first event.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use relay_protocol::StreamEventPayload;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::RelayError;
use crate::http::response::authenticate;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    token: Option<String>,
}

fn to_sse_event(payload: &StreamEventPayload) -> Option<Event> {
    serde_json::to_string(payload)
        .ok()
        .map(|json| Event::default().event(payload.event_name()).data(json))
}

pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let (_, session) = authenticate(&state, authorization, query.token.as_deref()).await?;

    let connected = StreamEventPayload::Connected {
        session_id: session.id.clone(),
        mic_holder: session.mic_holder().await,
    };
    let connected_frame = to_sse_event(&connected).expect("connected payload always serializes");

    let rx = session.subscribe();
    let relayed = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(payload) => to_sse_event(&payload).map(Ok),
            Err(_lagged) => {
                // A slow subscriber missed frames; resync with a fresh
                // connected frame rather than dropping it (§9).
                Some(Ok(Event::default().event("connected").data("{\"resync\":true}")))
            }
        }
    });

    let frames = stream::once(async move { Ok(connected_frame) }).chain(relayed);

    Ok(Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
