//! Relative age strings to absolute instants.
//!
//! The feed shows each item's age as `<n><unit> ago`, where unit is one of
//! `s`, `m`, `h`, `d` or `w`.

use crate::error::TimestampError;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_AGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s*([a-zA-Z])$").expect("relative age pattern is valid")
});

/// Convert `"5m ago"` into the instant five minutes before now.
pub fn convert(timestamp: &str) -> Result<DateTime<Utc>, TimestampError> {
    convert_at(timestamp, Utc::now())
}

/// Same as [`convert`] against a fixed `now`.
pub fn convert_at(timestamp: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, TimestampError> {
    let invalid = || TimestampError::InvalidTimestampFormat(timestamp.to_string());

    let trimmed = timestamp.trim();
    let trimmed = trimmed.strip_suffix(" ago").unwrap_or(trimmed).trim();

    let caps = RELATIVE_AGE.captures(trimmed).ok_or_else(invalid)?;
    let value: i64 = caps[1].parse().map_err(|_| invalid())?;

    let delta = match &caps[2] {
        "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        "w" => Duration::try_weeks(value),
        _ => None,
    }
    .ok_or_else(invalid)?;

    now.checked_sub_signed(delta).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_minutes() {
        let now = fixed_now();
        assert_eq!(convert_at("5m ago", now).unwrap(), now - Duration::minutes(5));
    }

    #[test]
    fn test_weeks() {
        let now = fixed_now();
        assert_eq!(convert_at("2w ago", now).unwrap(), now - Duration::days(14));
    }

    #[test]
    fn test_every_unit() {
        let now = fixed_now();
        assert_eq!(convert_at("30s ago", now).unwrap(), now - Duration::seconds(30));
        assert_eq!(convert_at("1h ago", now).unwrap(), now - Duration::hours(1));
        assert_eq!(convert_at("3d ago", now).unwrap(), now - Duration::days(3));
    }

    #[test]
    fn test_unknown_unit_fails() {
        assert_eq!(
            convert_at("3x ago", fixed_now()),
            Err(TimestampError::InvalidTimestampFormat("3x ago".to_string()))
        );
    }

    #[test]
    fn test_non_numeric_value_fails() {
        assert!(convert_at("am ago", fixed_now()).is_err());
        assert!(convert_at("m ago", fixed_now()).is_err());
        assert!(convert_at("", fixed_now()).is_err());
        assert!(convert_at("yesterday", fixed_now()).is_err());
    }

    #[test]
    fn test_missing_ago_suffix_is_tolerated() {
        let now = fixed_now();
        assert_eq!(convert_at("10m", now).unwrap(), now - Duration::minutes(10));
    }

    #[test]
    fn test_convert_uses_current_time() {
        let before = Utc::now();
        let converted = convert("5m ago").unwrap();
        let after = Utc::now();
        assert!(converted >= before - Duration::minutes(5));
        assert!(converted <= after - Duration::minutes(5));
    }
}
