use std::env;

use chrono::{DateTime, Duration, Utc};
use log::info;
use sqlx::{Connection, PgConnection};

const DB_ENV_KEY: &str = "POLLBOT_DB_URL";
const RETENTION_ENV_KEY: &str = "POLLBOT_RETENTION_DAYS";
const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
enum CleanupError {
    #[error("key {0} not found in environment")]
    MissingEnv(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[tokio::main]
async fn main() {
    env_logger::init();
    cleanup()
        .await
        .expect("Failed to run cleanup.")
}

fn retention_days() -> Result<i64, CleanupError> {
    match env::var(RETENTION_ENV_KEY) {
        Ok(raw) => raw.trim()
            .parse::<i64>()
            .ok()
            .filter(|days| *days >= 0)
            .ok_or(CleanupError::Invalid { key: RETENTION_ENV_KEY, value: raw }),
        Err(_) => Ok(DEFAULT_RETENTION_DAYS),
    }
}

fn cutoff(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, CleanupError> {
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or(CleanupError::Invalid { key: RETENTION_ENV_KEY, value: days.to_string() })
}

/// Deletes ended polls whose end time is older than the retention window.
/// Options and votes go with them through the cascading foreign keys.
async fn cleanup() -> Result<(), CleanupError> {
    let db_url = env::var(DB_ENV_KEY)
        .map_err(|_| CleanupError::MissingEnv(DB_ENV_KEY))?;
    let days = retention_days()?;

    let mut conn = PgConnection::connect(&db_url).await?;
    let cutoff = cutoff(Utc::now(), days)?;

    let done = sqlx::query("delete from poll where status = 'ended' and end_time < $1")
        .bind(cutoff)
        .execute(&mut conn)
        .await?;

    info!("Deleted {} ended polls older than {} days", done.rows_affected(), days);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn cutoff_is_retention_days_before_now() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 9, 19, 12, 0, 0).unwrap();
        assert_eq!(expected, cutoff(now, 30).unwrap());
    }

    #[test]
    fn cutoff_rejects_out_of_range_retention() {
        let now = Utc::now();
        for days in [100_000_000, i64::MAX] {
            match cutoff(now, days) {
                Err(CleanupError::Invalid { key, .. }) => assert_eq!(RETENTION_ENV_KEY, key),
                other => panic!("Expected Invalid for {} {:?}", days, other),
            }
        }
    }
}
