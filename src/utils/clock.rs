//! Defensive wall-clock parsing and comparison helpers.
//!
//! Schedule times and time-condition thresholds arrive as user-typed
//! `HH:MM` or `HH:MM:SS` strings. Parsing never fails outright: invalid
//! components fall back to caller-supplied defaults and every field is
//! clamped into its valid range, so a malformed time can steer a schedule
//! but can never abort a traversal.

use chrono::NaiveTime;
use tracing::warn;

/// Parse a `HH:MM[:SS]` string, falling back to the given defaults.
///
/// Non-numeric components take their default (seconds default to 0);
/// out-of-range components are clamped.
#[must_use]
pub fn parse_time_string(time_str: &str, default_hour: u32, default_minute: u32) -> (u32, u32, u32) {
    let trimmed = time_str.trim();
    if trimmed.is_empty() {
        return (default_hour, default_minute, 0);
    }

    let mut parts = trimmed.split(':');
    let hour = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(default_hour);
    let minute = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(default_minute);
    let second = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(0);

    if parts.next().is_some() {
        warn!(time = %time_str, "time string has extra components, ignoring");
    }

    (hour.min(23), minute.min(59), second.min(59))
}

/// [`parse_time_string`] packaged as a [`NaiveTime`].
#[must_use]
pub fn parse_naive_time(time_str: &str, default_hour: u32, default_minute: u32) -> NaiveTime {
    let (h, m, s) = parse_time_string(time_str, default_hour, default_minute);
    // Components are clamped above, so this cannot be out of range.
    NaiveTime::from_hms_opt(h, m, s).unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap())
}

/// Seconds since midnight. Time conditions compare in this space.
#[must_use]
pub fn seconds_since_midnight(t: NaiveTime) -> u32 {
    use chrono::Timelike;
    t.hour() * 3600 + t.minute() * 60 + t.second()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_hh_mm() {
        assert_eq!(parse_time_string("09:15", 0, 0), (9, 15, 0));
    }

    #[test]
    fn parses_hh_mm_ss() {
        assert_eq!(parse_time_string("15:29:59", 0, 0), (15, 29, 59));
    }

    #[test]
    fn empty_and_garbage_fall_back_to_defaults() {
        assert_eq!(parse_time_string("", 9, 15), (9, 15, 0));
        assert_eq!(parse_time_string("banana", 9, 15), (9, 15, 0));
        assert_eq!(parse_time_string("9:xx", 10, 30), (9, 30, 0));
    }

    #[test]
    fn clamps_out_of_range_fields() {
        assert_eq!(parse_time_string("99:99:99", 0, 0), (23, 59, 59));
    }

    #[test]
    fn naive_time_round_trip() {
        let t = parse_naive_time("13:45:10", 9, 15);
        assert_eq!((t.hour(), t.minute(), t.second()), (13, 45, 10));
        assert_eq!(seconds_since_midnight(t), 13 * 3600 + 45 * 60 + 10);
    }
}
