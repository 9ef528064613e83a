//! UTC time helpers shared by the scheduler, slot reservation, and store.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

/// Floor a timestamp down to the start of its minute.
pub fn floor_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// The next UTC instant strictly greater than `from` whose hour:minute equals
/// `minute_of_day` (0..=1439). Always lands on `from`'s day or the next one.
pub fn compute_next_run_at(minute_of_day: u32, from: DateTime<Utc>) -> DateTime<Utc> {
    let hour = minute_of_day / 60;
    let minute = minute_of_day % 60;
    let day_start = from
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    let candidate = Utc
        .from_utc_datetime(&day_start)
        .checked_add_signed(Duration::minutes(i64::from(minute_of_day)))
        .expect("minute offset within a day cannot overflow");
    debug_assert_eq!(candidate.hour(), hour);
    debug_assert_eq!(candidate.minute(), minute);

    if candidate > from {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// Format a timestamp the way every column/wire field in this system expects:
/// RFC3339 UTC with a literal `Z` suffix, millisecond precision.
pub fn to_iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a stored/wire ISO-8601 UTC timestamp.
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
