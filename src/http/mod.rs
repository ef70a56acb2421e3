pub mod captions;
pub mod cors;
pub mod events;
pub mod health;
pub mod keys;
pub mod live;
pub mod mic;
pub mod response;
pub mod stats;
pub mod sync;
pub mod usage;

use std::path::PathBuf;

use axum::extract::Request;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use tower::Service;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();

    let router = Router::new()
        .route(
            "/live",
            post(live::register).get(live::status).patch(live::set_sequence).delete(live::teardown),
        )
        .route("/captions", post(captions::submit))
        .route("/events", get(events::stream))
        .route("/sync", post(sync::sync))
        .route("/mic", post(mic::mic))
        .route("/health", get(health::health))
        .route("/contact", get(health::contact))
        .route("/stats", get(stats::get_stats).delete(stats::erase))
        .route("/keys", get(keys::list).post(keys::create))
        .route(
            "/keys/:key",
            get(keys::get).patch(keys::update).delete(keys::delete),
        )
        .route("/usage", get(usage::get_usage))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(response::no_cache_header))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            cors::dynamic_cors,
        ));

    let router = match static_dir {
        Some(dir) => router.fallback(move |method: Method, uri: Uri, req: Request| {
            let dir = dir.clone();
            async move { static_fallback(method, uri, req, dir).await }
        }),
        None => router.fallback(response::fallback_404),
    };

    router.with_state(state)
}

fn is_reserved_path(path: &str) -> bool {
    let first_segment = path.trim_start_matches('/').split('/').next().unwrap_or("");
    matches!(
        first_segment,
        "live" | "captions" | "events" | "sync" | "mic" | "health" | "contact" | "stats" | "keys"
            | "usage"
    )
}

async fn static_fallback(method: Method, uri: Uri, req: Request, dir: PathBuf) -> Response {
    let path = uri.path();
    if is_reserved_path(path) {
        return StatusCode::NOT_FOUND.into_response();
    }
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let index = dir.join("index.html");
    let mut service = ServeDir::new(dir).fallback(ServeFile::new(index));
    match service.call(req).await {
        Ok(response) => response.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
