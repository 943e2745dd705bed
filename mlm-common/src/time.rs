//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// The "zero" timestamp: older than any real modification time
///
/// Used for snapshots that must never be considered fresh.
pub fn zero() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

/// True when `candidate` is present and strictly newer than `reference`
///
/// An absent timestamp (storage that was never written) is never newer.
pub fn is_newer(candidate: Option<DateTime<Utc>>, reference: DateTime<Utc>) -> bool {
    candidate.is_some_and(|ts| ts > reference)
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
