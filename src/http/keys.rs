//! `GET|POST|PATCH|DELETE /keys[/:key]` (§6): admin CRUD for API keys, plus
//! `POST /keys?freetier` as a rate-gated self-service path when enabled.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;

use crate::auth::check_admin;
use crate::error::RelayError;
use crate::repo::{self, keys::ApiKeyRow};
use crate::state::AppState;

fn admin_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-admin-key").and_then(|v| v.to_str().ok())
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), RelayError> {
    check_admin(&state.config.admin_key, admin_header(headers))
}

fn generate_key() -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyQuery {
    #[serde(default)]
    pub freetier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub owner: String,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub daily_limit: Option<i64>,
    pub lifetime_limit: Option<i64>,
}

const FREE_TIER_EXPIRY_DAYS: i64 = 30;
const FREE_TIER_DAILY_LIMIT: i64 = 500;
const FREE_TIER_LIFETIME_LIMIT: i64 = 5_000;

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CreateKeyQuery>,
    Json(body): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<ApiKeyRow>), RelayError> {
    if query.freetier.is_some() {
        return create_freetier(&state, body).await;
    }

    require_admin(&state, &headers)?;
    let key = generate_key();
    let row = repo::keys::create(
        &state.pool,
        &key,
        &body.owner,
        body.email.as_deref(),
        body.expires_at,
        body.daily_limit,
        body.lifetime_limit,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Self-service path (§3, §9): refuses a second record for the same email.
/// Origin-based request-rate throttling is left to the deployer's reverse
/// proxy; this endpoint only enforces the one-key-per-email rule.
async fn create_freetier(
    state: &AppState,
    body: CreateKeyRequest,
) -> Result<(StatusCode, Json<ApiKeyRow>), RelayError> {
    if !state.config.free_apikey_active {
        return Err(RelayError::NotFound);
    }
    let Some(email) = body.email.as_deref() else {
        return Err(RelayError::Validation("email is required".to_owned()));
    };
    if repo::keys::get_by_email(&state.pool, email).await?.is_some() {
        return Err(RelayError::Validation(
            "an API key already exists for this email".to_owned(),
        ));
    }

    let key = generate_key();
    let expires_at = Utc::now() + chrono::Duration::days(FREE_TIER_EXPIRY_DAYS);
    let row = repo::keys::create(
        &state.pool,
        &key,
        &body.owner,
        Some(email),
        Some(expires_at),
        Some(FREE_TIER_DAILY_LIMIT),
        Some(FREE_TIER_LIFETIME_LIMIT),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApiKeyRow>>, RelayError> {
    require_admin(&state, &headers)?;
    Ok(Json(repo::keys::list(&state.pool).await?))
}

pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<ApiKeyRow>, RelayError> {
    require_admin(&state, &headers)?;
    repo::keys::get_by_key(&state.pool, &key)
        .await?
        .map(Json)
        .ok_or(RelayError::NotFound)
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyRequest {
    pub owner: Option<String>,
    #[serde(default)]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub daily_limit: Option<Option<i64>>,
    #[serde(default)]
    pub lifetime_limit: Option<Option<i64>>,
    #[serde(default)]
    pub revoke: bool,
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(body): Json<UpdateKeyRequest>,
) -> Result<Json<ApiKeyRow>, RelayError> {
    require_admin(&state, &headers)?;

    if body.revoke {
        repo::keys::revoke(&state.pool, &key).await?;
        let _ = repo::stats::insert_auth_event(&state.pool, Some(&key), "revoked", None).await;
    }

    let update = repo::keys::KeyUpdate {
        owner: body.owner,
        expires_at: body.expires_at,
        daily_limit: body.daily_limit,
        lifetime_limit: body.lifetime_limit,
    };
    repo::keys::update(&state.pool, &key, update)
        .await?
        .map(Json)
        .ok_or(RelayError::NotFound)
}

/// `DELETE /keys/:key` revokes rather than hard-deletes (§8 scenario 5's
/// `PATCH`/`DELETE` both land the key in the revoked state). Hard deletion
/// is reserved for the periodic revoked-key sweep (§4.2, §4.7).
pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<StatusCode, RelayError> {
    require_admin(&state, &headers)?;
    let revoked = repo::keys::revoke(&state.pool, &key).await?;
    if revoked {
        let _ = repo::stats::insert_auth_event(&state.pool, Some(&key), "revoked", None).await;
    }
    Ok(StatusCode::NO_CONTENT)
}
