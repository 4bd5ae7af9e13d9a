//! Universal Geographic Code expansion.
//!
//! A UGC group is a compact hyphen-delimited run like
//! `CAZ001-002>005-141800-`: a state+kind prefix, bare zone numbers, ranges,
//! and a trailing purge timestamp. County codes (`..C###`) map onto FIPS;
//! forecast/fire zone codes (`..Z###`) do not.

use once_cell::sync::Lazy;
use regex::Regex;

/// State / territory postal abbreviation → state FIPS prefix.
const STATE_FIPS: &[(&str, &str)] = &[
    ("AL", "01"),
    ("AK", "02"),
    ("AZ", "04"),
    ("AR", "05"),
    ("CA", "06"),
    ("CO", "08"),
    ("CT", "09"),
    ("DE", "10"),
    ("DC", "11"),
    ("FL", "12"),
    ("GA", "13"),
    ("HI", "15"),
    ("ID", "16"),
    ("IL", "17"),
    ("IN", "18"),
    ("IA", "19"),
    ("KS", "20"),
    ("KY", "21"),
    ("LA", "22"),
    ("ME", "23"),
    ("MD", "24"),
    ("MA", "25"),
    ("MI", "26"),
    ("MN", "27"),
    ("MS", "28"),
    ("MO", "29"),
    ("MT", "30"),
    ("NE", "31"),
    ("NV", "32"),
    ("NH", "33"),
    ("NJ", "34"),
    ("NM", "35"),
    ("NY", "36"),
    ("NC", "37"),
    ("ND", "38"),
    ("OH", "39"),
    ("OK", "40"),
    ("OR", "41"),
    ("PA", "42"),
    ("RI", "44"),
    ("SC", "45"),
    ("SD", "46"),
    ("TN", "47"),
    ("TX", "48"),
    ("UT", "49"),
    ("VT", "50"),
    ("VA", "51"),
    ("WA", "53"),
    ("WV", "54"),
    ("WI", "55"),
    ("WY", "56"),
    ("AS", "60"),
    ("GU", "66"),
    ("MP", "69"),
    ("PR", "72"),
    ("VI", "78"),
];

pub fn state_fips(abbr: &str) -> Option<&'static str> {
    STATE_FIPS
        .iter()
        .find(|(state, _)| *state == abbr)
        .map(|(_, fips)| *fips)
}

static PREFIXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]{2,3})(\d{3})(?:>(\d{3}))?$").unwrap());
static BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{3})(?:>(\d{3}))?$").unwrap());
static COUNTY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Z]{2})C(\d{3})$").unwrap());

/// Expand a raw UGC group into individual identifiers, deduplicated, in
/// order of first appearance.
///
/// `CAZ001-002>005-141800-` → `[CAZ001, CAZ002, CAZ003, CAZ004, CAZ005]`.
/// Six-digit tokens are purge timestamps; unrecognized tokens are skipped.
pub fn expand(group: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut prefix: Option<String> = None;

    let mut push = |out: &mut Vec<String>, code: String| {
        if !out.contains(&code) {
            out.push(code);
        }
    };

    for token in group.trim().trim_matches('-').split('-') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some(caps) = PREFIXED.captures(token) {
            let p = caps[1].to_string();
            push_range(&mut out, &mut push, &p, &caps[2], caps.get(3).map(|m| m.as_str()));
            prefix = Some(p);
        } else if let Some(caps) = BARE.captures(token) {
            if let Some(p) = &prefix {
                push_range(&mut out, &mut push, p, &caps[1], caps.get(2).map(|m| m.as_str()));
            }
        }
        // 6-digit purge timestamps and anything else fall through
    }

    out
}

fn push_range(
    out: &mut Vec<String>,
    push: &mut impl FnMut(&mut Vec<String>, String),
    prefix: &str,
    start: &str,
    end: Option<&str>,
) {
    let Ok(lo) = start.parse::<u32>() else {
        return;
    };
    match end.and_then(|e| e.parse::<u32>().ok()) {
        Some(hi) if lo <= hi && hi - lo < 1000 => {
            for n in lo..=hi {
                push(out, format!("{}{:03}", prefix, n));
            }
        }
        Some(_) => {}
        None => push(out, format!("{}{:03}", prefix, lo)),
    }
}

/// FIPS code for a county UGC (`XXC###`). Zone codes have no FIPS.
pub fn to_fips(ugc: &str) -> Option<String> {
    let caps = COUNTY.captures(ugc)?;
    let state = state_fips(&caps[1])?;
    Some(format!("{}{}", state, &caps[2]))
}

static GROUP_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[A-Z]{2}[CZ]\d{3}[0-9A-Z>\-]*-[ \t]*$").unwrap());
static GROUP_CONTINUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Z>\-]+-[ \t]*$").unwrap());

/// Find the first UGC group in a product body, rejoining wrapped lines.
pub fn find_group(text: &str) -> Option<String> {
    let start = GROUP_START.find(text)?;
    let mut group = start.as_str().trim().to_string();

    for line in text[start.end()..].lines().skip(1) {
        let line = line.trim();
        if GROUP_CONTINUATION.is_match(line) && !GROUP_START.is_match(line) {
            group.push_str(line);
        } else {
            break;
        }
    }

    Some(group)
}
