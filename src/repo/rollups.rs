//! `domain_hourly_stats` increments (§4.2, §4.7). One upsert per event kind;
//! callers increment exactly one counter per call.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy)]
pub enum Counter {
    SessionsStarted,
    SessionsEnded,
    CaptionsSent,
    CaptionsFailed,
    BatchesSent,
}

impl Counter {
    fn column(self) -> &'static str {
        match self {
            Counter::SessionsStarted => "sessions_started",
            Counter::SessionsEnded => "sessions_ended",
            Counter::CaptionsSent => "captions_sent",
            Counter::CaptionsFailed => "captions_failed",
            Counter::BatchesSent => "batches_sent",
        }
    }
}

pub async fn increment(
    pool: &SqlitePool,
    domain: &str,
    counter: Counter,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let date = now.format("%Y-%m-%d").to_string();
    let hour = now.format("%H").to_string().parse::<i64>().unwrap_or(0);
    let column = counter.column();

    sqlx::query(&format!(
        "INSERT INTO domain_hourly_stats (date, hour, domain, {column}) VALUES (?, ?, ?, 1)
         ON CONFLICT(date, hour, domain) DO UPDATE SET {column} = {column} + 1"
    ))
    .bind(&date)
    .bind(hour)
    .bind(domain)
    .execute(pool)
    .await?;
    Ok(())
}

/// Records the current active-session count as the peak for this domain/hour
/// if it exceeds the stored value.
pub async fn observe_peak_sessions(
    pool: &SqlitePool,
    domain: &str,
    active_sessions: i64,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let date = now.format("%Y-%m-%d").to_string();
    let hour = now.format("%H").to_string().parse::<i64>().unwrap_or(0);

    sqlx::query(
        "INSERT INTO domain_hourly_stats (date, hour, domain, peak_sessions) VALUES (?, ?, ?, ?)
         ON CONFLICT(date, hour, domain) DO UPDATE SET peak_sessions = MAX(peak_sessions, excluded.peak_sessions)",
    )
    .bind(&date)
    .bind(hour)
    .bind(domain)
    .bind(active_sessions)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAggregateRow {
    pub date: String,
    pub hour: Option<i64>,
    pub domain: String,
    pub sessions_started: i64,
    pub sessions_ended: i64,
    pub captions_sent: i64,
    pub captions_failed: i64,
    pub batches_sent: i64,
    pub peak_sessions: i64,
}

/// `GET /usage`: per-domain aggregate over `[from, to]` at day or hour
/// granularity (§6).
pub async fn aggregate(
    pool: &SqlitePool,
    from: &str,
    to: &str,
    hourly: bool,
) -> Result<Vec<UsageAggregateRow>, sqlx::Error> {
    let rows = if hourly {
        sqlx::query(
            "SELECT date, hour, domain,
                    sessions_started, sessions_ended, captions_sent, captions_failed, batches_sent,
                    peak_sessions
             FROM domain_hourly_stats
             WHERE date BETWEEN ? AND ?
             ORDER BY date ASC, hour ASC, domain ASC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|r| UsageAggregateRow {
            date: r.get("date"),
            hour: Some(r.get("hour")),
            domain: r.get("domain"),
            sessions_started: r.get("sessions_started"),
            sessions_ended: r.get("sessions_ended"),
            captions_sent: r.get("captions_sent"),
            captions_failed: r.get("captions_failed"),
            batches_sent: r.get("batches_sent"),
            peak_sessions: r.get("peak_sessions"),
        })
        .collect()
    } else {
        sqlx::query(
            "SELECT date, domain,
                    SUM(sessions_started) AS sessions_started, SUM(sessions_ended) AS sessions_ended,
                    SUM(captions_sent) AS captions_sent, SUM(captions_failed) AS captions_failed,
                    SUM(batches_sent) AS batches_sent, MAX(peak_sessions) AS peak_sessions
             FROM domain_hourly_stats
             WHERE date BETWEEN ? AND ?
             GROUP BY date, domain
             ORDER BY date ASC, domain ASC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|r| UsageAggregateRow {
            date: r.get("date"),
            hour: None,
            domain: r.get("domain"),
            sessions_started: r.get("sessions_started"),
            sessions_ended: r.get("sessions_ended"),
            captions_sent: r.get("captions_sent"),
            captions_failed: r.get("captions_failed"),
            batches_sent: r.get("batches_sent"),
            peak_sessions: r.get("peak_sessions"),
        })
        .collect()
    };
    Ok(rows)
}
