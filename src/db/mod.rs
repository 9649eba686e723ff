mod repository;
mod schema;

pub use repository::{Repository, StoreStats};

use chrono::{DateTime, SecondsFormat, Utc};

/// Canonical text form of timestamps in the store. Lexicographic order
/// matches chronological order, which the ready-task query relies on.
pub fn sql_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}
