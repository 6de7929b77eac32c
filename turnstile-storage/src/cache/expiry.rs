//! Entry expiry in wall-clock milliseconds.

use std::time::Duration;

use chrono::Utc;

/// Stored in place of a deadline for entries that never expire.
pub const NEVER: i64 = i64::MAX;

/// Deadline for an entry written now with `ttl`.
pub fn deadline(ttl: Option<Duration>) -> i64 {
    deadline_from(now_millis(), ttl)
}

pub fn deadline_from(now: i64, ttl: Option<Duration>) -> i64 {
    match ttl {
        None => NEVER,
        Some(ttl) => {
            let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now.saturating_add(millis)
        }
    }
}

/// Whether an entry with `deadline` is expired at `now`.
///
/// An entry written with a zero TTL is expired at the instant it is written.
pub fn is_expired(deadline: i64, now: i64) -> bool {
    deadline != NEVER && deadline <= now
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
