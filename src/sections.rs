//! Section and threat extraction.
//!
//! Products carry dotted all-caps headings (`* WHAT...`, `HAZARD...`,
//! `THUNDERSTORM DAMAGE THREAT...CONSIDERABLE`) whose values feed the
//! `alertInfo` map. Threat values collapse onto a small canonical
//! vocabulary.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// The headings that survive into `alertInfo`, keyed by their normalized
/// (underscored) names.
const KNOWN_KEYS: &[&str] = &[
    "WHAT",
    "WHERE",
    "WHEN",
    "IMPACTS",
    "HAZARD",
    "SOURCE",
    "IMPACT",
    "TORNADO",
    "TORNADO_DAMAGE_THREAT",
    "THUNDERSTORM_DAMAGE_THREAT",
    "FLASH_FLOOD",
    "FLASH_FLOOD_DAMAGE_THREAT",
    "HAIL_THREAT",
    "WIND_THREAT",
    "MAX_HAIL_SIZE",
    "MAX_WIND_GUST",
    "WATERSPOUT",
    "SNOW_SQUALL",
    "WINDS",
    "RELATIVE_HUMIDITY",
    "TEMPERATURES",
    "SEVERITY",
];

const THREAT_KEYS: &[&str] = &[
    "TORNADO",
    "TORNADO_DAMAGE_THREAT",
    "THUNDERSTORM_DAMAGE_THREAT",
    "FLASH_FLOOD",
    "FLASH_FLOOD_DAMAGE_THREAT",
    "HAIL_THREAT",
    "WIND_THREAT",
    "WATERSPOUT",
    "SNOW_SQUALL",
];

const CANONICAL_THREATS: &[&str] = &[
    "RADAR INDICATED",
    "RADAR ESTIMATED",
    "POSSIBLE",
    "CONSIDERABLE",
    "LIKELY",
    "CONFIRMED",
    "NONE",
];

static HEADING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[*\-•]?\s*([A-Z][A-Z /]*?)\.{2,}\s*(.*)$").unwrap());

/// Scan a message part for dotted headings and their values.
pub fn extract(part: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    let mut commit = |sections: &mut BTreeMap<String, String>, entry: Option<(String, String)>| {
        if let Some((key, value)) = entry {
            let value = value.trim().to_string();
            if !value.is_empty() {
                sections.entry(key).or_insert(value);
            }
        }
    };

    for line in part.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            commit(&mut sections, current.take());
            continue;
        }

        if let Some(caps) = HEADING_LINE.captures(trimmed) {
            let key = normalize_key(&caps[1]);
            if KNOWN_KEYS.contains(&key.as_str()) {
                commit(&mut sections, current.take());
                current = Some((key, caps[2].trim().to_string()));
                continue;
            }
            // a dotted line we don't recognize still ends the open section
            commit(&mut sections, current.take());
            continue;
        }

        if let Some((_, value)) = current.as_mut() {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(trimmed);
        }
    }
    commit(&mut sections, current.take());

    for key in THREAT_KEYS {
        if let Some(value) = sections.get_mut(*key) {
            *value = canonicalize_threat(value);
        }
    }

    sections
}

fn normalize_key(heading: &str) -> String {
    heading.trim().replace(['/', ' '], "_").replace("__", "_")
}

/// Reduce a threat value to the canonical vocabulary, or failing that to its
/// leading short phrase.
pub fn canonicalize_threat(value: &str) -> String {
    let upper = value.to_ascii_uppercase();
    for canonical in CANONICAL_THREATS {
        if upper.contains(canonical) {
            return (*canonical).to_string();
        }
    }

    let phrase = value
        .split(['.', ';', ','])
        .next()
        .unwrap_or(value)
        .trim();
    phrase.to_string()
}
