use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::RateLimitRecord;

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max: i64,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max: i64, window: Duration) -> Self {
        Self { max, window }
    }

    pub fn per_hour(max: i64) -> Self {
        Self::new(max, Duration::hours(1))
    }
}

/// One counter to consult: `limit` applied to `key` within `scope`.
#[derive(Debug, Clone, Copy)]
pub struct LimitCheck<'a> {
    pub scope: &'a str,
    pub key: &'a str,
    pub limit: RateLimit,
}

/// Seconds until the window frees up, or `None` while under the cap.
pub fn wait_seconds(
    conn: &Connection,
    check: &LimitCheck<'_>,
    now: NaiveDateTime,
) -> anyhow::Result<Option<i64>> {
    let record = queries::get_rate_limit(conn, check.scope, check.key)?;
    Ok(match record {
        Some(r) if r.reset_at > now && r.count >= check.limit.max => {
            Some((r.reset_at - now).num_seconds().max(1))
        }
        _ => None,
    })
}

/// Counts one event, opening a fresh window when the previous one has closed.
pub fn hit(conn: &Connection, check: &LimitCheck<'_>, now: NaiveDateTime) -> anyhow::Result<i64> {
    let record = match queries::get_rate_limit(conn, check.scope, check.key)? {
        Some(r) if r.reset_at > now => RateLimitRecord {
            count: r.count + 1,
            reset_at: r.reset_at,
        },
        _ => RateLimitRecord {
            count: 1,
            reset_at: now + check.limit.window,
        },
    };
    queries::save_rate_limit(conn, check.scope, check.key, &record)?;
    Ok(record.count)
}

/// Consults every counter before consuming any. When one or more are at their
/// cap nothing is counted and the longest remaining wait is reported.
pub fn enforce(
    conn: &Connection,
    checks: &[LimitCheck<'_>],
    now: NaiveDateTime,
    message: &str,
) -> Result<(), AppError> {
    let mut longest_wait: Option<i64> = None;
    for check in checks {
        if let Some(wait) = wait_seconds(conn, check, now)? {
            tracing::warn!(scope = check.scope, key = check.key, wait, "rate limit reached");
            longest_wait = Some(longest_wait.map_or(wait, |w| w.max(wait)));
        }
    }

    if let Some(wait_seconds) = longest_wait {
        return Err(AppError::RateLimited {
            message: format!("{message}, try again in {wait_seconds} seconds"),
            wait_seconds,
        });
    }

    for check in checks {
        hit(conn, check, now)?;
    }
    Ok(())
}
