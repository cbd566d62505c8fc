//! Timestamp utilities

use chrono::{DateTime, NaiveDateTime, Utc};

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Parse a legacy `005` control field (`YYYYMMDDhhmmss.f`) as UTC
///
/// The fractional part is optional. Returns `None` for anything else.
pub fn parse_legacy_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let whole = value.split('.').next()?;
    if whole.len() != 14 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a `YYYY-MM-DD` date as the start of that day in UTC
pub fn parse_date_start(value: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use std::time::Duration;

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(0), Duration::from_millis(0));
        assert_eq!(millis_to_duration(1000), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_legacy_timestamp_with_fraction() {
        let ts = parse_legacy_timestamp("20160922232729.0").unwrap();
        assert_eq!(ts.year(), 2016);
        assert_eq!(ts.month(), 9);
        assert_eq!(ts.day(), 22);
        assert_eq!(ts.hour(), 23);
        assert_eq!(ts.minute(), 27);
        assert_eq!(ts.second(), 29);
    }

    #[test]
    fn test_parse_legacy_timestamp_without_fraction() {
        assert!(parse_legacy_timestamp("20010101000000").is_some());
    }

    #[test]
    fn test_parse_legacy_timestamp_rejects_garbage() {
        assert!(parse_legacy_timestamp("").is_none());
        assert!(parse_legacy_timestamp("2016-09-22").is_none());
        assert!(parse_legacy_timestamp("20161322232729.0").is_none());
    }

    #[test]
    fn test_parse_date_start() {
        let ts = parse_date_start("2020-02-29").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day(), ts.hour()), (2020, 2, 29, 0));
        assert!(parse_date_start("2021-02-29").is_none());
    }
}
