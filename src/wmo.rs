//! Human-readable product timestamps.
//!
//! NWS text products carry issuance lines like `1037 PM PST Fri Feb 13 2026`
//! or `9:28 PM MST Fri Feb 13 2026`. These are local times in a fixed set of
//! zone abbreviations; see [`crate::clock`].

use crate::clock::zone_offset;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)(\d{1,2}:\d{2}|\d{3,4})\s+(AM|PM)\s+([A-Z]{2,4})\s+[A-Za-z]{3}\s+([A-Za-z]{3})\s+(\d{1,2})\s+(\d{4})",
    )
    .unwrap()
});

/// Parse the first human product timestamp found in `text` into UTC.
///
/// Three- and four-digit hour forms (`839 PM`, `1037 PM`) are read as `H MM`
/// / `HH MM`. An unknown zone abbreviation yields `None`.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let caps = TIMESTAMP.captures(text)?;

    let (hour12, minute) = parse_clock(caps.get(1)?.as_str())?;
    let meridiem = caps.get(2)?.as_str();
    let offset = zone_offset(caps.get(3)?.as_str())?;
    let month = month_number(caps.get(4)?.as_str())?;
    let day: u32 = caps.get(5)?.as_str().parse().ok()?;
    let year: i32 = caps.get(6)?.as_str().parse().ok()?;

    let hour = match (hour12, meridiem) {
        (12, "AM") => 0,
        (12, "PM") => 12,
        (h, "PM") => h + 12,
        (h, _) => h,
    };

    let local = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    let with_zone = offset.from_local_datetime(&local).single()?;
    Some(with_zone.with_timezone(&Utc))
}

fn parse_clock(token: &str) -> Option<(u32, u32)> {
    if let Some((h, m)) = token.split_once(':') {
        return Some((h.parse().ok()?, m.parse().ok()?));
    }
    // 839 -> 8:39, 1037 -> 10:37
    let (h, m) = token.split_at(token.len() - 2);
    Some((h.parse().ok()?, m.parse().ok()?))
}

fn month_number(abbr: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = abbr.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_digit_pm() {
        let t = parse_timestamp("1037 PM PST Fri Feb 13 2026").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-02-14T06:37:00+00:00");
    }

    #[test]
    fn colon_form() {
        let t = parse_timestamp("9:28 PM MST Fri Feb 13 2026").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-02-14T04:28:00+00:00");
    }

    #[test]
    fn three_digit_hour() {
        let t = parse_timestamp("839 PM CST Fri Feb 13 2026").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-02-14T02:39:00+00:00");
    }

    #[test]
    fn noon_and_midnight() {
        let noon = parse_timestamp("1200 PM EST Mon Jan 5 2026").unwrap();
        assert_eq!(noon.to_rfc3339(), "2026-01-05T17:00:00+00:00");
        let midnight = parse_timestamp("1200 AM EST Mon Jan 5 2026").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2026-01-05T05:00:00+00:00");
    }

    #[test]
    fn unknown_zone_is_none() {
        assert!(parse_timestamp("1037 PM NZDT Fri Feb 13 2026").is_none());
    }

    #[test]
    fn embedded_in_product() {
        let body = "Tornado Warning\nNational Weather Service San Diego CA\n738 PM PST Thu Feb 12 2026\n\nThe National Weather Service has issued...";
        let t = parse_timestamp(body).unwrap();
        assert_eq!(t.to_rfc3339(), "2026-02-13T03:38:00+00:00");
    }
}
