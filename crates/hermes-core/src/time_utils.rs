use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

/// Returns the wall-clock hour of `at` as observed in `timezone`.
pub fn local_hour(at: DateTime<Utc>, timezone: Tz) -> u32 {
    at.with_timezone(&timezone).hour()
}

/// Parses an IANA timezone name such as `Europe/Moscow`.
pub fn parse_timezone(raw: &str) -> Result<Tz, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("timezone cannot be empty".to_string());
    }
    trimmed
        .parse::<Tz>()
        .map_err(|error| format!("invalid timezone '{trimmed}': {error}"))
}
