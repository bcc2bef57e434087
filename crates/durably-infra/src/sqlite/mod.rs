//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod execution;
pub mod idempotency;
pub mod pool;
pub mod process;

pub use execution::SqliteExecutionRepository;
pub use idempotency::SqliteIdempotencyStore;
pub use pool::{DatabasePool, PoolSettings};
pub use process::SqliteProcessRepository;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use durably_types::error::RepositoryError;

// ---------------------------------------------------------------------------
// Column codecs shared by the repositories
// ---------------------------------------------------------------------------

/// Latest storable timestamp. Later years would render as `+10000-...`.
const LATEST_STORED: &str = "9999-12-31T23:59:59.999999Z";

/// Fixed-width UTC timestamps so string comparison in SQL is chronological.
///
/// Times past year 9999 (saturated deadlines) are clamped to [`LATEST_STORED`].
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    if dt.year() > 9999 {
        return LATEST_STORED.to_string();
    }
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn parse_json(s: &str, column: &str) -> Result<serde_json::Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn datetimes_sort_as_strings() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 9).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(format_datetime(&a) < format_datetime(&b));
        assert_eq!(format_datetime(&a), "2026-01-01T00:00:09.000000Z");
        assert_eq!(parse_datetime(&format_datetime(&b)).unwrap(), b);
    }

    #[test]
    fn far_future_still_sorts_after_present() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let stored = format_datetime(&DateTime::<Utc>::MAX_UTC);
        assert_eq!(stored, LATEST_STORED);
        assert!(stored > format_datetime(&now));
        assert!(parse_datetime(&stored).unwrap() > now);
    }
}
