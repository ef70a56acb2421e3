//! The error taxonomy from spec §7, realized as one enum so every handler
//! that returns `Result<T, RelayError>` gets the bit-exact status code and
//! envelope shape for free instead of hand-building `(StatusCode, Json(..))`
//! tuples at each call site.

use axum::{http::StatusCode, response::IntoResponse, Json};
use relay_protocol::HttpErrorEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("upstream network error: {0}")]
    Network(String),

    #[error("{0}")]
    Auth(AuthFailure),

    #[error("{0}")]
    UsageLimit(UsageFailure),

    #[error("not found")]
    NotFound,

    #[error("upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("missing or malformed bearer token")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("domain not allowed")]
    DomainNotAllowed,
    #[error("unknown API key")]
    UnknownKey,
    #[error("API key revoked")]
    Revoked,
    #[error("API key expired")]
    Expired,
    #[error("admin key not configured")]
    AdminNotConfigured,
    #[error("forbidden")]
    AdminForbidden,
}

#[derive(Debug, thiserror::Error)]
pub enum UsageFailure {
    #[error("daily_limit_exceeded")]
    DailyLimitExceeded,
    #[error("lifetime_limit_exceeded")]
    LifetimeLimitExceeded,
}

impl RelayError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            RelayError::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "config_error"),
            RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            RelayError::Network(_) => (StatusCode::BAD_GATEWAY, "network_error"),
            RelayError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            RelayError::UpstreamStatus { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RelayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            RelayError::Auth(auth) => match auth {
                AuthFailure::MissingToken | AuthFailure::InvalidToken => {
                    (StatusCode::UNAUTHORIZED, "invalid_token")
                }
                AuthFailure::DomainNotAllowed => {
                    (StatusCode::FORBIDDEN, "domain_not_allowed")
                }
                AuthFailure::UnknownKey => (StatusCode::UNAUTHORIZED, "unknown_key"),
                AuthFailure::Revoked => (StatusCode::UNAUTHORIZED, "revoked"),
                AuthFailure::Expired => (StatusCode::UNAUTHORIZED, "expired"),
                AuthFailure::AdminNotConfigured => {
                    (StatusCode::SERVICE_UNAVAILABLE, "admin_not_configured")
                }
                AuthFailure::AdminForbidden => (StatusCode::FORBIDDEN, "forbidden"),
            },
            RelayError::UsageLimit(usage) => match usage {
                UsageFailure::DailyLimitExceeded => {
                    (StatusCode::TOO_MANY_REQUESTS, "daily_limit_exceeded")
                }
                UsageFailure::LifetimeLimitExceeded => {
                    (StatusCode::TOO_MANY_REQUESTS, "lifetime_limit_exceeded")
                }
            },
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();
        tracing::debug!(status = %status, code, message, "request failed");
        (
            status,
            Json(HttpErrorEnvelope::with_code(message, code)),
        )
            .into_response()
    }
}

impl From<crate::upstream::UpstreamError> for RelayError {
    fn from(err: crate::upstream::UpstreamError) -> Self {
        match err {
            crate::upstream::UpstreamError::Config(message) => RelayError::Config(message),
            crate::upstream::UpstreamError::Status { status, body } => {
                RelayError::UpstreamStatus { status, message: body }
            }
            crate::upstream::UpstreamError::Network(message) => RelayError::Network(message),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
