//! The key & usage store's key half (§4.2). Plain `sqlx::query`/`query_as`
//! with `Row::get` rather than the compile-time-checked `query!` macro,
//! since the latter needs a live database at build time.

use chrono::{DateTime, Utc};
use relay_protocol::KeyValidity;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRow {
    pub key: String,
    pub owner: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub daily_limit: Option<i64>,
    pub lifetime_limit: Option<i64>,
    pub lifetime_count: i64,
}

impl ApiKeyRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Self {
        Self {
            key: row.get("key"),
            owner: row.get("owner"),
            email: row.get("email"),
            created_at: parse_ts(row.get("created_at")),
            expires_at: row
                .get::<Option<String>, _>("expires_at")
                .map(|s| parse_ts(s)),
            active: row.get::<i64, _>("active") != 0,
            revoked_at: row
                .get::<Option<String>, _>("revoked_at")
                .map(|s| parse_ts(s)),
            daily_limit: row.get("daily_limit"),
            lifetime_limit: row.get("lifetime_limit"),
            lifetime_count: row.get("lifetime_count"),
        }
    }

    /// §3 invariant: a key is usable iff active ∧ (no expiry ∨ expiry in future).
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|exp| exp > now)
    }
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const SELECT_COLUMNS: &str = "key, owner, email, created_at, expires_at, active, revoked_at, daily_limit, lifetime_limit, lifetime_count";

pub async fn create(
    pool: &SqlitePool,
    key: &str,
    owner: &str,
    email: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
    daily_limit: Option<i64>,
    lifetime_limit: Option<i64>,
) -> Result<ApiKeyRow, sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO api_keys (key, owner, email, created_at, expires_at, active, daily_limit, lifetime_limit, lifetime_count)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?, 0)",
    )
    .bind(key)
    .bind(owner)
    .bind(email)
    .bind(now.to_rfc3339())
    .bind(expires_at.map(|d| d.to_rfc3339()))
    .bind(daily_limit)
    .bind(lifetime_limit)
    .execute(pool)
    .await?;

    get_by_key(pool, key)
        .await?
        .ok_or_else(|| sqlx::Error::RowNotFound)
}

pub async fn get_by_key(pool: &SqlitePool, key: &str) -> Result<Option<ApiKeyRow>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM api_keys WHERE key = ?"))
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(ApiKeyRow::from_row))
}

pub async fn get_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<ApiKeyRow>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM api_keys WHERE email = ?"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(ApiKeyRow::from_row))
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<ApiKeyRow>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM api_keys ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(ApiKeyRow::from_row).collect())
}

pub struct KeyUpdate {
    pub owner: Option<String>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub daily_limit: Option<Option<i64>>,
    pub lifetime_limit: Option<Option<i64>>,
}

pub async fn update(
    pool: &SqlitePool,
    key: &str,
    update: KeyUpdate,
) -> Result<Option<ApiKeyRow>, sqlx::Error> {
    if let Some(owner) = update.owner {
        sqlx::query("UPDATE api_keys SET owner = ? WHERE key = ?")
            .bind(owner)
            .bind(key)
            .execute(pool)
            .await?;
    }
    if let Some(expires_at) = update.expires_at {
        sqlx::query("UPDATE api_keys SET expires_at = ? WHERE key = ?")
            .bind(expires_at.map(|d| d.to_rfc3339()))
            .bind(key)
            .execute(pool)
            .await?;
    }
    if let Some(daily_limit) = update.daily_limit {
        sqlx::query("UPDATE api_keys SET daily_limit = ? WHERE key = ?")
            .bind(daily_limit)
            .bind(key)
            .execute(pool)
            .await?;
    }
    if let Some(lifetime_limit) = update.lifetime_limit {
        sqlx::query("UPDATE api_keys SET lifetime_limit = ? WHERE key = ?")
            .bind(lifetime_limit)
            .bind(key)
            .execute(pool)
            .await?;
    }
    get_by_key(pool, key).await
}

/// Sets `active = 0` and stamps `revoked_at`. Idempotent.
pub async fn revoke(pool: &SqlitePool, key: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE api_keys SET active = 0, revoked_at = ? WHERE key = ? AND revoked_at IS NULL",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn hard_delete(pool: &SqlitePool, key: &str) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM caption_usage WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM session_stats WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM caption_errors WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM auth_events WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM api_keys WHERE key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// §4.2 `validate`: `unknown_key | revoked | expired | ok`.
pub async fn validate(pool: &SqlitePool, key: &str) -> Result<KeyValidity, sqlx::Error> {
    let Some(row) = get_by_key(pool, key).await? else {
        return Ok(KeyValidity::UnknownKey);
    };
    if !row.active {
        return Ok(KeyValidity::Revoked);
    }
    if let Some(exp) = row.expires_at {
        if exp <= Utc::now() {
            return Ok(KeyValidity::Expired);
        }
    }
    Ok(KeyValidity::Ok)
}

/// Erasure request (§4.2 `anonymise`): blank owner, revoke, drop dependent
/// rows, but keep the key row and email until its original expiry, for
/// legitimate-interest retention to block re-signup abuse.
pub async fn anonymise(pool: &SqlitePool, key: &str) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        "UPDATE api_keys SET owner = '', active = 0, revoked_at = COALESCE(revoked_at, ?) WHERE key = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(key)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM session_stats WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM caption_errors WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM auth_events WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM caption_usage WHERE api_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Hard-deletes keys revoked more than `ttl_days` ago and their dependent
/// rows, in one transaction. `dry_run` returns the count without mutating.
pub async fn clean_revoked(
    pool: &SqlitePool,
    ttl_days: i64,
    dry_run: bool,
) -> Result<u64, sqlx::Error> {
    let cutoff = (Utc::now() - chrono::Duration::days(ttl_days)).to_rfc3339();

    if dry_run {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM api_keys WHERE revoked_at IS NOT NULL AND revoked_at < ?",
        )
        .bind(&cutoff)
        .fetch_one(pool)
        .await?;
        return Ok(row.get::<i64, _>("n") as u64);
    }

    let mut tx = pool.begin().await?;
    let stale_keys: Vec<String> = sqlx::query(
        "SELECT key FROM api_keys WHERE revoked_at IS NOT NULL AND revoked_at < ?",
    )
    .bind(&cutoff)
    .fetch_all(&mut *tx)
    .await?
    .iter()
    .map(|r| r.get("key"))
    .collect();

    for key in &stale_keys {
        sqlx::query("DELETE FROM caption_usage WHERE api_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM session_stats WHERE api_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM caption_errors WHERE api_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM auth_events WHERE api_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM api_keys WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(stale_keys.len() as u64)
}
