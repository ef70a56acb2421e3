//! Dynamic per-domain CORS (§4.8, §6). `tower_http::cors::CorsLayer`'s
//! origin predicate is synchronous and can't consult the session store, so
//! this is hand-rolled in the same `from_fn_with_state` shape as
//! [`crate::http::response::no_cache_header`].
//!
//! - `/health`, `/contact`, `/live` (registration): any origin.
//! - admin paths (`/keys*`, `/usage` when admin-gated): no CORS headers.
//! - everything else: the `Origin` header is echoed back only if it
//!   matches a domain that currently has a live session.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

const OPEN_PATHS: &[&str] = &["/health", "/contact", "/live"];
const ADMIN_PREFIXES: &[&str] = &["/keys"];

fn is_open_path(path: &str) -> bool {
    OPEN_PATHS.iter().any(|p| path == *p)
}

fn is_admin_path(path: &str) -> bool {
    ADMIN_PREFIXES.iter().any(|p| path.starts_with(p))
}

pub async fn dynamic_cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let method = request.method().clone();
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if method == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_headers(&state, &path, origin.as_deref(), response.headers_mut()).await;
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&state, &path, origin.as_deref(), response.headers_mut()).await;
    response
}

async fn apply_headers(
    state: &AppState,
    path: &str,
    origin: Option<&str>,
    headers: &mut axum::http::HeaderMap,
) {
    if is_admin_path(path) {
        return;
    }

    let Some(origin) = origin else {
        return;
    };

    let allowed = is_open_path(path) || state.sessions.domain_has_session(origin).await;
    if !allowed {
        return;
    }

    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("authorization, content-type, x-admin-key"),
        );
    }
}
