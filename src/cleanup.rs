//! Message-body normalization.
//!
//! Raw products mix WMO text conventions, embedded XML fragments, and
//! inconsistent blank-line discipline. Cleanup is a fixed sequence of pure
//! string rewrites; each stage has a name and can be tested in isolation.
//! The splitter then cuts the cleaned body at `&&` / `$$` separators.

use once_cell::sync::Lazy;
use regex::Regex;

type Stage = fn(&str) -> String;

/// The cleanup pipeline, in application order.
pub const STAGES: &[(&str, Stage)] = &[
    ("strip_xml_tags", strip_xml_tags),
    ("normalize_line_endings", normalize_line_endings),
    ("rejoin_wrapped_ugc", rejoin_wrapped_ugc),
    ("isolate_separators", isolate_separators),
    ("isolate_timestamps", isolate_timestamps),
    ("break_bullets", break_bullets),
    ("break_headings", break_headings),
    ("break_data_headings", break_data_headings),
    ("isolate_precautionary", isolate_precautionary),
    ("collapse_blank_lines", collapse_blank_lines),
];

/// Run the full pipeline.
pub fn clean(text: &str) -> String {
    let mut out = text.to_string();
    for (_, stage) in STAGES {
        out = stage(&out);
    }
    out.trim().to_string()
}

static XML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z?!][^>]*>").unwrap());

fn strip_xml_tags(text: &str) -> String {
    XML_TAG.replace_all(text, "").into_owned()
}

static TRAILING_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());

fn normalize_line_endings(text: &str) -> String {
    TRAILING_SPACE
        .replace_all(&text.replace("\r\n", "\n").replace('\r', "\n"), "")
        .into_owned()
}

static WRAPPED_UGC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([A-Z]{2}[CZ]\d{3}[0-9A-Z>\-]*-)\n([0-9>][0-9A-Z>\-]*-)").unwrap());

/// UGC groups wrap across lines ending in `-`; rejoin them so the group
/// reads as one line.
fn rejoin_wrapped_ugc(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let next = WRAPPED_UGC.replace_all(&out, "${1}${2}").into_owned();
        if next == out {
            return out;
        }
        out = next;
    }
}

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*(&&|\$\$)[ \t]*$").unwrap());

/// `&&` and `$$` become their own blank-line-bounded paragraphs.
fn isolate_separators(text: &str) -> String {
    SEPARATOR.replace_all(text, "\n${1}\n").into_owned()
}

static TIMESTAMP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d{1,2}:\d{2}|\d{3,4}) (AM|PM) [A-Z]{2,4} [A-Za-z]{3} [A-Za-z]{3} \d{1,2} \d{4}",
    )
    .unwrap()
});

/// Issuance timestamps go on their own line.
fn isolate_timestamps(text: &str) -> String {
    TIMESTAMP_LINE.replace_all(text, "\n${0}\n").into_owned()
}

static BULLET_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n+[ \t]*(\*[ \t]*[A-Z][A-Z /]*\.\.\.)").unwrap());
static BULLET_INTERIOR_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\*[^\n]*)\n\n+([ \t]*[a-z0-9])").unwrap());

/// Starred sections (`* WHAT...`) separate with a blank line; their interior
/// continuation lines keep single newlines.
fn break_bullets(text: &str) -> String {
    let out = BULLET_START.replace_all(text, "\n\n${1}").into_owned();
    BULLET_INTERIOR_GAP.replace_all(&out, "${1}\n${2}").into_owned()
}

static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n+[ \t]*((?:HAZARD|SOURCE|IMPACTS?)\.\.\.|Locations impacted include)").unwrap()
});

fn break_headings(text: &str) -> String {
    HEADING.replace_all(text, "\n\n${1}").into_owned()
}

const DATA_HEADINGS: &str = r"TIME\.\.\.MOT\.\.\.LOC|LAT\.\.\.LON|(?:MAX HAIL SIZE|MAX WIND GUST|WATERSPOUT|SNOW SQUALL|[A-Z][A-Z ]* THREAT|TORNADO|FLASH FLOOD)\.\.\.";

static DATA_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\n+[ \t]*((?:{}))", DATA_HEADINGS)).unwrap());
static DATA_HEADING_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?m)^((?:{})[^\n]*)\n\n+", DATA_HEADINGS)).unwrap());

/// Data headings (`TIME...MOT...LOC`, `LAT...LON`, threat tags, …) take two
/// newlines before and exactly one after.
fn break_data_headings(text: &str) -> String {
    let out = DATA_HEADING.replace_all(text, "\n\n${1}").into_owned();
    DATA_HEADING_TAIL.replace_all(&out, "${1}\n").into_owned()
}

static PRECAUTIONARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n+[ \t]*(PRECAUTIONARY/PREPAREDNESS ACTIONS\.\.\.)[ \t]*\n+").unwrap());

fn isolate_precautionary(text: &str) -> String {
    PRECAUTIONARY
        .replace_all(text, "\n\n${1}\n\n")
        .into_owned()
}

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUN.replace_all(text, "\n\n").into_owned()
}

/// Split a cleaned body at `&&` / `$$` separators.
///
/// The separator line attaches to the part it terminates, so no part is ever
/// a bare separator; empty parts are dropped.
pub fn split_parts(text: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();

    let mut close = |parts: &mut Vec<String>, current: &mut String| {
        let part = current.trim().to_string();
        current.clear();
        if part.is_empty() {
            return;
        }
        let only_separators = part.lines().all(|l| {
            let l = l.trim();
            l.is_empty() || l == "&&" || l == "$$"
        });
        if only_separators {
            if let Some(last) = parts.last_mut() {
                last.push_str("\n\n");
                last.push_str(&part);
            }
        } else {
            parts.push(part);
        }
    };

    for line in text.lines() {
        current.push_str(line);
        current.push('\n');
        let trimmed = line.trim();
        if trimmed == "&&" || trimmed == "$$" {
            close(&mut parts, &mut current);
        }
    }
    close(&mut parts, &mut current);

    parts
}
