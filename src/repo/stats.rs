//! Append-only operator-reporting rows (§3 "Session-Stats / Caption-Error /
//! Auth-Event... Rows") plus the queries `GET /stats` needs over them.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub async fn insert_session_summary(
    pool: &SqlitePool,
    session_id: &str,
    api_key: &str,
    domain: &str,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    ended_by: &str,
    delivered_count: i64,
    failed_count: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO session_stats (session_id, api_key, domain, started_at, ended_at, ended_by, delivered_count, failed_count)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(api_key)
    .bind(domain)
    .bind(started_at.to_rfc3339())
    .bind(ended_at.to_rfc3339())
    .bind(ended_by)
    .bind(delivered_count)
    .bind(failed_count)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_caption_error(
    pool: &SqlitePool,
    session_id: &str,
    api_key: &str,
    error: &str,
    status_code: Option<u16>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO caption_errors (session_id, api_key, error, status_code, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(api_key)
    .bind(error)
    .bind(status_code.map(i64::from))
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_auth_event(
    pool: &SqlitePool,
    api_key: Option<&str>,
    event_type: &str,
    domain: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO auth_events (api_key, event_type, domain, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(api_key)
    .bind(event_type)
    .bind(domain)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatRow {
    pub session_id: String,
    pub domain: String,
    pub started_at: String,
    pub ended_at: String,
    pub ended_by: String,
    pub delivered_count: i64,
    pub failed_count: i64,
}

pub async fn recent_sessions(
    pool: &SqlitePool,
    api_key: &str,
    limit: i64,
) -> Result<Vec<SessionStatRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT session_id, domain, started_at, ended_at, ended_by, delivered_count, failed_count
         FROM session_stats WHERE api_key = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(api_key)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| SessionStatRow {
            session_id: r.get("session_id"),
            domain: r.get("domain"),
            started_at: r.get("started_at"),
            ended_at: r.get("ended_at"),
            ended_by: r.get("ended_by"),
            delivered_count: r.get("delivered_count"),
            failed_count: r.get("failed_count"),
        })
        .collect())
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionErrorRow {
    pub session_id: String,
    pub error: String,
    pub status_code: Option<i64>,
    pub created_at: String,
}

pub async fn recent_errors(
    pool: &SqlitePool,
    api_key: &str,
    limit: i64,
) -> Result<Vec<CaptionErrorRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT session_id, error, status_code, created_at
         FROM caption_errors WHERE api_key = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(api_key)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| CaptionErrorRow {
            session_id: r.get("session_id"),
            error: r.get("error"),
            status_code: r.get("status_code"),
            created_at: r.get("created_at"),
        })
        .collect())
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEventRow {
    pub event_type: String,
    pub domain: Option<String>,
    pub created_at: String,
}

pub async fn recent_auth_events(
    pool: &SqlitePool,
    api_key: &str,
    limit: i64,
) -> Result<Vec<AuthEventRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT event_type, domain, created_at
         FROM auth_events WHERE api_key = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(api_key)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| AuthEventRow {
            event_type: r.get("event_type"),
            domain: r.get("domain"),
            created_at: r.get("created_at"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::in_memory_pool;
    use crate::repo::keys;

    #[tokio::test]
    async fn auth_event_row_appears_after_revoke_flow() {
        let pool = in_memory_pool().await;
        keys::create(&pool, "K1", "owner", None, None, None, None)
            .await
            .unwrap();
        insert_auth_event(&pool, Some("K1"), "revoked", None)
            .await
            .unwrap();

        let events = recent_auth_events(&pool, "K1", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "revoked");
    }

    #[tokio::test]
    async fn recent_sessions_orders_newest_first() {
        let pool = in_memory_pool().await;
        let now = Utc::now();
        insert_session_summary(&pool, "s1", "K1", "https://a", now, now, "client", 1, 0)
            .await
            .unwrap();
        insert_session_summary(&pool, "s2", "K1", "https://a", now, now, "ttl", 2, 1)
            .await
            .unwrap();

        let rows = recent_sessions(&pool, "K1", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_id, "s2");
    }
}
