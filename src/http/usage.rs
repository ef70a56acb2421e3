//! `GET /usage` (§6): per-domain hourly/daily roll-ups. Admin-gated unless
//! `USAGE_PUBLIC` is set, in which case anyone may read the aggregate.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::check_admin;
use crate::error::RelayError;
use crate::repo::rollups::{aggregate, UsageAggregateRow};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub hourly: bool,
}

pub async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Vec<UsageAggregateRow>>, RelayError> {
    if !state.config.usage_public {
        let presented = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
        check_admin(&state.config.admin_key, presented)?;
    }

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let from = query.from.unwrap_or_else(|| today.clone());
    let to = query.to.unwrap_or(today);

    let rows = aggregate(&state.pool, &from, &to, query.hourly).await?;
    Ok(Json(rows))
}
