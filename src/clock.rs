use chrono::{DateTime, FixedOffset, Utc};

/// UTC offsets for the timezone abbreviations NWS products use.
///
/// Products outside this table are treated as having no parseable local time.
const ZONE_OFFSETS: &[(&str, i32)] = &[
    ("PST", -8),
    ("PDT", -7),
    ("MST", -7),
    ("MDT", -6),
    ("CST", -6),
    ("CDT", -5),
    ("EST", -5),
    ("EDT", -4),
    ("AKST", -9),
    ("AKDT", -8),
    ("HST", -10),
    ("GMT", 0),
    ("UTC", 0),
];

/// Look up the fixed UTC offset for an NWS zone abbreviation.
pub fn zone_offset(abbr: &str) -> Option<FixedOffset> {
    ZONE_OFFSETS
        .iter()
        .find(|(name, _)| *name == abbr)
        .and_then(|(_, hours)| FixedOffset::east_opt(hours * 3600))
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
