//! Daily and weekly leaderboard window identifiers.
//!
//! Leaderboard buckets are keyed by the UTC date (`2024-06-01`) and a
//! week identifier (`2024-W23`) derived from the moment an event is
//! *processed*, not the submission timestamp.
//!
//! # Week numbering
//!
//! The week number is `ceil((days_since_jan1 + weekday_of_jan1 + 1) / 7)`
//! with Sunday-based weekdays, i.e. weeks are seeded on the Sunday grid of
//! the current year and week 1 is the (possibly partial) week containing
//! January 1. This is deliberately *not* strict ISO-8601 numbering: every
//! day of a year lands in a week of that same year, so a bucket never
//! spans a year boundary. Readers and writers must share this exact
//! function; renumbering would silently split a week's leaderboard across
//! two buckets.

use chrono::{DateTime, Datelike, Utc};

/// TTL applied to daily leaderboard buckets: 7 days after last write.
pub const DAILY_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// TTL applied to weekly leaderboard buckets: 28 days after last write.
pub const WEEKLY_TTL_SECS: i64 = 28 * 24 * 60 * 60;

/// UTC calendar date key, `YYYY-MM-DD`.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Weekly bucket key, `YYYY-Www` (zero-padded week number).
pub fn week_key(now: DateTime<Utc>) -> String {
    let date = now.date_naive();
    let jan1 = date.with_ordinal(1).expect("ordinal 1 always exists");

    let days_since_jan1 = u64::from(date.ordinal0());
    let weekday_of_jan1 = u64::from(jan1.weekday().num_days_from_sunday());

    // ceil((days + weekday + 1) / 7) in integer arithmetic
    let week = (days_since_jan1 + weekday_of_jan1 + 1).div_ceil(7);

    format!("{}-W{:02}", date.year(), week)
}
