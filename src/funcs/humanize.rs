//! Human-readable sizes and relative times.
//!
//! `humanize("size", "82854982")` → `83 MB`
//! `humanize("time", "Mon, 02 Jan 2006 15:04:05 -0700")` → `N years ago`
//! `humanize("time:%Y-%m-%d", "2024-01-01")` → relative to now

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::funcs::FuncError;

const SIZE_UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 12 * MONTH;
const LONG_TIME: i64 = 37 * YEAR;

/// (upper bound exclusive, phrase, divisor) in milliseconds. A phrase
/// containing `{n}` is filled with `diff / divisor`.
const MAGNITUDES: [(i64, &str, i64); 17] = [
    (SECOND, "now", 1),
    (2 * SECOND, "1 second", 1),
    (MINUTE, "{n} seconds", SECOND),
    (2 * MINUTE, "1 minute", 1),
    (HOUR, "{n} minutes", MINUTE),
    (2 * HOUR, "1 hour", 1),
    (DAY, "{n} hours", HOUR),
    (2 * DAY, "1 day", 1),
    (WEEK, "{n} days", DAY),
    (2 * WEEK, "1 week", 1),
    (MONTH, "{n} weeks", WEEK),
    (2 * MONTH, "1 month", 1),
    (YEAR, "{n} months", MONTH),
    (18 * MONTH, "1 year", 1),
    (2 * YEAR, "2 years", 1),
    (LONG_TIME, "{n} years", YEAR),
    (i64::MAX, "a long while", 1),
];

/// Format a byte count with SI units.
pub fn bytes(size: u64) -> String {
    if size < 10 {
        return format!("{} B", size);
    }
    let mut exp = 0;
    let mut scaled = size;
    while scaled >= 1000 && exp < SIZE_UNITS.len() - 1 {
        scaled /= 1000;
        exp += 1;
    }
    let value = ((size as f64) / 1000f64.powi(exp as i32) * 10.0 + 0.5).floor() / 10.0;
    if value < 10.0 {
        format!("{:.1} {}", value, SIZE_UNITS[exp])
    } else {
        format!("{:.0} {}", value, SIZE_UNITS[exp])
    }
}

/// Phrase describing `then` relative to `now`.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let (diff, label) = if then > now {
        ((then - now).num_milliseconds(), "from now")
    } else {
        ((now - then).num_milliseconds(), "ago")
    };

    let idx = MAGNITUDES
        .iter()
        .position(|(bound, _, _)| *bound > diff)
        .unwrap_or(MAGNITUDES.len() - 1);
    let (_, phrase, divisor) = MAGNITUDES[idx];

    if phrase == "now" {
        return phrase.to_string();
    }
    let phrase = phrase.replace("{n}", &(diff / divisor).to_string());
    format!("{} {}", phrase, label)
}

fn parse_time(layout: Option<&str>, data: &str) -> Result<DateTime<Utc>, String> {
    let Some(layout) = layout else {
        return DateTime::parse_from_rfc2822(data)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| e.to_string());
    };

    let zoned = DateTime::parse_from_str(data, layout);
    if let Ok(t) = zoned {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(data, layout) {
        return Ok(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(data, layout) {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    zoned.map(|t| t.with_timezone(&Utc)).map_err(|e| e.to_string())
}

/// `humanize(formatSpec, data)` evaluated against a fixed clock.
pub fn humanize_at(spec: &str, data: &str, now: DateTime<Utc>) -> Result<String, FuncError> {
    let (kind, layout) = match spec.split_once(':') {
        Some((kind, layout)) => (kind, Some(layout)),
        None => (spec, None),
    };

    match kind {
        "size" => {
            let size: u64 = data
                .trim()
                .parse()
                .map_err(|e| FuncError::Failed(format!("humanize: size cannot be parsed: {}", e)))?;
            Ok(bytes(size))
        }
        "time" => {
            let then = parse_time(layout, data)
                .map_err(|e| FuncError::Failed(format!("humanize: time cannot be parsed: {}", e)))?;
            Ok(relative_time(then, now))
        }
        other => Err(FuncError::Failed(format!("humanize: unknown format `{}`", other))),
    }
}

/// `humanize(formatSpec, data)` against the current time.
pub fn humanize(spec: &str, data: &str) -> Result<String, FuncError> {
    humanize_at(spec, data, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_sizes() {
        assert_eq!(bytes(0), "0 B");
        assert_eq!(bytes(9), "9 B");
        assert_eq!(bytes(1000), "1.0 kB");
        assert_eq!(bytes(1_048_576), "1.0 MB");
        assert_eq!(bytes(82_854_982), "83 MB");
        assert_eq!(humanize("size", "1048576").unwrap(), "1.0 MB");
    }

    #[test]
    fn test_relative_phrases() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let ago = |d: Duration| relative_time(now - d, now);

        assert_eq!(ago(Duration::milliseconds(300)), "now");
        assert_eq!(ago(Duration::seconds(1)), "1 second ago");
        assert_eq!(ago(Duration::seconds(45)), "45 seconds ago");
        assert_eq!(ago(Duration::minutes(90)), "1 hour ago");
        assert_eq!(ago(Duration::days(3)), "3 days ago");
        assert_eq!(ago(Duration::weeks(2)), "2 weeks ago");
        assert_eq!(ago(Duration::days(400)), "1 year ago");
        assert_eq!(ago(Duration::days(365 * 50)), "a long while ago");
        assert_eq!(relative_time(now + Duration::hours(5), now), "5 hours from now");
    }

    #[test]
    fn test_time_layouts() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();

        let out = humanize_at("time", "Sat, 01 Jun 2024 00:00:00 +0000", now).unwrap();
        assert_eq!(out, "2 weeks ago");

        let out = humanize_at("time:%Y-%m-%d", "2024-06-01", now).unwrap();
        assert_eq!(out, "2 weeks ago");

        let out = humanize_at("time:%Y-%m-%d %H:%M", "2024-06-14 23:00", now).unwrap();
        assert_eq!(out, "1 hour ago");
    }

    #[test]
    fn test_errors() {
        assert!(humanize("bogus", "x").unwrap_err().to_string().contains("bogus"));
        assert!(humanize("size", "-5").is_err());
        assert!(humanize("time", "yesterday").is_err());
    }
}
