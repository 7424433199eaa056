//! Small string and time helpers shared by the pipeline stages.

use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes, on a character boundary,
/// with an ellipsis and the number of dropped bytes appended.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Strip leading list markers and separators the classifier likes to emit
/// before an explanation, e.g. `"- Because"` or `": Because"`.
pub fn trim_formatting(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '*' | '.' | ','))
        .trim_end()
}

/// `HH:MM` wall-clock time `interval` after `now`.
pub fn clock_after<Tz: TimeZone>(now: DateTime<Tz>, interval: Duration) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let delta = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
    (now + delta).format("%H:%M").to_string()
}

/// `HH:MM` local time when a sleep of `interval` started now will end.
pub fn local_clock_after(interval: Duration) -> String {
    clock_after(Local::now(), interval)
}
