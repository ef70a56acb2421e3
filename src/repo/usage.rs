//! The key & usage store's usage half (§4.2): the daily usage row and the
//! lifetime counter are incremented atomically, in one transaction, only
//! when both limits allow the send. A denied check never mutates either
//! counter.

use chrono::Utc;
use relay_protocol::UsageCheckResult;
use sqlx::{Row, SqlitePool};

pub async fn check_and_increment(
    pool: &SqlitePool,
    api_key: &str,
    by: i64,
) -> Result<UsageCheckResult, sqlx::Error> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut tx = pool.begin().await?;

    let limits = sqlx::query("SELECT daily_limit, lifetime_limit, lifetime_count FROM api_keys WHERE key = ?")
        .bind(api_key)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(limits) = limits else {
        tx.rollback().await?;
        // Unknown key: treat as no usage record to touch; callers validate
        // the key before reaching usage checks, so this is defensive only.
        return Ok(UsageCheckResult::Granted);
    };
    let daily_limit: Option<i64> = limits.get("daily_limit");
    let lifetime_limit: Option<i64> = limits.get("lifetime_limit");
    let lifetime_count: i64 = limits.get("lifetime_count");

    let daily_count: i64 = sqlx::query("SELECT count FROM caption_usage WHERE api_key = ? AND date = ?")
        .bind(api_key)
        .bind(&today)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| r.get("count"))
        .unwrap_or(0);

    if let Some(limit) = daily_limit {
        if daily_count + by > limit {
            tx.rollback().await?;
            return Ok(UsageCheckResult::DailyLimitExceeded);
        }
    }
    if let Some(limit) = lifetime_limit {
        if lifetime_count + by > limit {
            tx.rollback().await?;
            return Ok(UsageCheckResult::LifetimeLimitExceeded);
        }
    }

    sqlx::query(
        "INSERT INTO caption_usage (api_key, date, count) VALUES (?, ?, ?)
         ON CONFLICT(api_key, date) DO UPDATE SET count = count + excluded.count",
    )
    .bind(api_key)
    .bind(&today)
    .bind(by)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE api_keys SET lifetime_count = lifetime_count + ? WHERE key = ?")
        .bind(by)
        .bind(api_key)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(UsageCheckResult::Granted)
}

pub async fn daily_count(pool: &SqlitePool, api_key: &str, date: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT count FROM caption_usage WHERE api_key = ? AND date = ?")
        .bind(api_key)
        .bind(date)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("count")).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::in_memory_pool;
    use crate::repo::keys;

    #[tokio::test]
    async fn granted_check_increments_both_counters_atomically() {
        let pool = in_memory_pool().await;
        keys::create(&pool, "K1", "owner", None, None, Some(10), Some(100))
            .await
            .unwrap();

        let result = check_and_increment(&pool, "K1", 1).await.unwrap();
        assert_eq!(result, UsageCheckResult::Granted);

        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(daily_count(&pool, "K1", &today).await.unwrap(), 1);
        let row = keys::get_by_key(&pool, "K1").await.unwrap().unwrap();
        assert_eq!(row.lifetime_count, 1);
    }

    #[tokio::test]
    async fn denied_check_never_mutates_counters() {
        let pool = in_memory_pool().await;
        keys::create(&pool, "K1", "owner", None, None, Some(1), None)
            .await
            .unwrap();

        assert_eq!(
            check_and_increment(&pool, "K1", 1).await.unwrap(),
            UsageCheckResult::Granted
        );
        // second send would exceed daily_limit=1
        assert_eq!(
            check_and_increment(&pool, "K1", 1).await.unwrap(),
            UsageCheckResult::DailyLimitExceeded
        );

        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(daily_count(&pool, "K1", &today).await.unwrap(), 1);
        let row = keys::get_by_key(&pool, "K1").await.unwrap().unwrap();
        assert_eq!(row.lifetime_count, 1);
    }

    #[tokio::test]
    async fn lifetime_limit_denies_independent_of_daily_limit() {
        let pool = in_memory_pool().await;
        keys::create(&pool, "K1", "owner", None, None, None, Some(1))
            .await
            .unwrap();

        assert_eq!(
            check_and_increment(&pool, "K1", 1).await.unwrap(),
            UsageCheckResult::Granted
        );
        assert_eq!(
            check_and_increment(&pool, "K1", 1).await.unwrap(),
            UsageCheckResult::LifetimeLimitExceeded
        );
    }
}
