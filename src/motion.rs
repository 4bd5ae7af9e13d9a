//! `TIME...MOT...LOC` event motion decoding.
//!
//! The line reads `TIME...MOT...LOC 0339Z 245DEG 30KT 3459 11703`: an
//! HHMM UTC clock time, a heading, a speed, and a position in the
//! `LAT...LON` hundredths convention. The clock time carries no date; it is
//! reattached to the issuance day, shifting ±1 day when that lands closer.

use crate::alert::{EventMotion, MotionKind};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static MOTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"TIME\.\.\.MOT\.\.\.LOC\s+(\d{4})Z\s+(\d{1,3})DEG\s+(\d{1,3})KT((?:\s+\d{4,5}\b)+)")
        .unwrap()
});

/// Parse the first motion line in `text`, reconstructing its instant
/// against `issued`.
pub fn parse(text: &str, issued: DateTime<Utc>, phenomena: Option<&str>) -> Option<EventMotion> {
    let caps = MOTION.captures(text)?;

    let clock = &caps[1];
    let hour: u32 = clock[0..2].parse().ok()?;
    let minute: u32 = clock[2..4].parse().ok()?;
    let heading_deg: f64 = caps[2].parse().ok()?;
    let speed_kt: f64 = caps[3].parse().ok()?;

    let points: Vec<f64> = caps[4]
        .split_whitespace()
        .filter_map(|t| t.parse::<f64>().ok())
        .collect();
    let (lat, lon) = match points.as_slice() {
        [lat, lon, ..] => (lat / 100.0, -(lon / 100.0)),
        _ => return None,
    };

    Some(EventMotion {
        raw: caps[0].trim().to_string(),
        time_iso: reattach_day(hour, minute, issued),
        kind: classify(phenomena),
        heading_deg,
        speed_kt,
        lat,
        lon,
        coord: [lon, lat],
    })
}

/// Combine an HHMM clock reading with the issuance day, choosing among the
/// same day and its neighbors the candidate closest to `issued`; candidates
/// further than 12 h away are rejected.
fn reattach_day(hour: u32, minute: u32, issued: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let mut best: Option<DateTime<Utc>> = None;
    for day_offset in [-1i64, 0, 1] {
        let day = issued.date_naive() + Duration::days(day_offset);
        let candidate = Utc.from_utc_datetime(&day.and_time(time));
        let closer = match best {
            Some(current) => {
                (candidate - issued).num_seconds().abs() < (current - issued).num_seconds().abs()
            }
            None => true,
        };
        if closer {
            best = Some(candidate);
        }
    }

    best.filter(|t| (*t - issued).num_seconds().abs() <= 12 * 3600)
}

fn classify(phenomena: Option<&str>) -> MotionKind {
    match phenomena {
        Some("TO") => MotionKind::Tornado,
        Some("FF") | Some("FA") | Some("FL") => MotionKind::Flood,
        _ => MotionKind::Storm,
    }
}
