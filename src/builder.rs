//! Stanza → alert records.
//!
//! One product body can carry legacy WMO text, an embedded CAP document, or
//! both; the builder reconciles the three encodings into zero or more
//! normalized records plus a store disposition. Everything here fails soft:
//! a stanza the builder cannot interpret is discarded with a debug log,
//! never an error.

use crate::alert::{Alert, Properties};
use crate::cap::CapAlert;
use crate::cleanup;
use crate::config::Config;
use crate::coords;
use crate::geometry::CountyGeometry;
use crate::message::Stanza;
use crate::motion;
use crate::sections;
use crate::ugc;
use crate::vtec::{self, ActionCode, Vtec};
use crate::wmo;
use crate::zones::ZoneResolver;
use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

/// What the ingest loop should do with a parsed stanza.
#[derive(Debug)]
pub enum Disposition {
    /// Upsert these records; `update` marks continuation-type actions whose
    /// geometry is inherited from the record they replace.
    Upsert { records: Vec<Alert>, update: bool },
    /// A `CAN`/`EXP` action: delete the record matching this VTEC key.
    Cancel { key: String },
    /// Nothing to do.
    Discard,
}

static LEGACY_KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(URGENT|STATEMENT|MESSAGE|REQUEST|BULLETIN)\b").unwrap());
static JSON_PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[A-Za-z_]+"\s*:\s*""#).unwrap());
static BULLETIN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"BULLETIN[^\n]*\n([^\n]+)\nNational Weather Service").unwrap());
static IN_EFFECT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^.*\bIN EFFECT\b.*$").unwrap());
static ALERTISH_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^.*\b(ADVISORY|WARNING|WATCH|EMERGENCY|STATEMENT|ALERT)\b.*$").unwrap()
});
static UGC_SHAPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}[CZ]\d{3}").unwrap());
static DIGITS_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\s[:punct:]]+$").unwrap());

pub struct Builder {
    allowed_alerts: Vec<String>,
    allow_no_geometry: bool,
}

impl Builder {
    pub fn new(config: &Config) -> Self {
        Self {
            allowed_alerts: config.allowed_alerts.clone(),
            allow_no_geometry: config.allow_no_geometry,
        }
    }

    /// Run the full transform for one stanza.
    pub async fn build(
        &self,
        stanza: &Stanza,
        county: &CountyGeometry,
        resolver: Option<&ZoneResolver>,
        now: DateTime<Utc>,
    ) -> Disposition {
        let body = &stanza.body;
        let legacy = LEGACY_KEYWORDS.is_match(body);
        let cap = CapAlert::find(body);

        if cap.is_none() {
            if body.trim_start().starts_with('<') {
                debug!("discarding raw XML body with no CAP alert");
                return Disposition::Discard;
            }
            if JSON_PAIR.find_iter(body).count() >= 3 {
                debug!("discarding serialized JSON-like body");
                return Disposition::Discard;
            }
        }

        // The working text: legacy products keep their body, otherwise the
        // CAP block collapses into a compact textual rendition
        let text = match (&cap, legacy) {
            (Some(cap), false) => compose_cap_text(cap),
            _ => body.clone(),
        };

        // A VTEC present both inline and in the CAP block means the CAP
        // variant is a duplicate broadcast of the same event
        if let Some(cap) = &cap {
            if let (Some(inline), Some(embedded)) =
                (decode_outside_cap(body, cap), cap.vtec().and_then(decode_param))
            {
                if inline.phenomena == embedded.phenomena
                    && inline.significance == embedded.significance
                {
                    debug!("discarding duplicate CAP+VTEC broadcast for {}", inline.key());
                    return Disposition::Discard;
                }
            }
        }

        let decoded = vtec::decode(&text);

        match decoded {
            None => self.build_non_vtec(stanza, cap.as_ref(), resolver, now).await,
            Some(v) => match v.action {
                ActionCode::Cancel | ActionCode::Expire => Disposition::Cancel { key: v.key() },
                ActionCode::Routine => {
                    debug!("dropping routine product {}", v.key());
                    Disposition::Discard
                }
                action => {
                    let update = matches!(
                        action,
                        ActionCode::Upgrade
                            | ActionCode::Correct
                            | ActionCode::Continue
                            | ActionCode::ExtendTime
                            | ActionCode::ExtendArea
                            | ActionCode::ExtendBoth
                    );
                    let records = self
                        .build_vtec_records(stanza, &text, &v, cap.as_ref(), county, resolver, now)
                        .await;
                    if records.is_empty() {
                        Disposition::Discard
                    } else {
                        Disposition::Upsert { records, update }
                    }
                }
            },
        }
    }

    /// Non-VTEC minimal path: a single record straight from CAP fields,
    /// splitter suppressed.
    async fn build_non_vtec(
        &self,
        stanza: &Stanza,
        cap: Option<&CapAlert>,
        resolver: Option<&ZoneResolver>,
        now: DateTime<Utc>,
    ) -> Disposition {
        let Some(cap) = cap else {
            debug!("discarding: no VTEC and no CAP block");
            return Disposition::Discard;
        };
        let Some(event) = cap.event() else {
            debug!("discarding: CAP block without an event");
            return Disposition::Discard;
        };
        if !self
            .allowed_alerts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(event))
        {
            debug!("discarding non-VTEC event not in allow list: {}", event);
            return Disposition::Discard;
        }

        let issued = cap
            .sent()
            .or_else(|| stanza.issue.map(|t| t.with_timezone(&Utc)))
            .unwrap_or(now);
        let expiry = cap.expires().filter(|e| *e >= issued);

        let id = cap
            .identifier()
            .map(String::from)
            .unwrap_or_else(|| synthesize_id(stanza));

        let message = cleanup::clean(&compose_cap_text(cap));

        let codes = gather_non_vtec_ugc(cap, &stanza.body);
        let fips: Vec<String> = codes.iter().filter_map(|c| ugc::to_fips(c)).collect();

        let points = cap.polygon().map(coords::parse_cap_polygon).unwrap_or_default();
        let geometry: Vec<Vec<[f64; 2]>> =
            coords::close_ring(&points).into_iter().collect();

        let area_desc = match (cap.area_desc(), resolver) {
            (Some(desc), _) => Some(desc.to_string()),
            (None, Some(resolver)) => resolver.resolve_area(&codes).await,
            (None, None) => None,
        };

        let mut alert_info = sections::extract(&message);
        if let Some(severity) = cap.severity() {
            alert_info
                .entry("SEVERITY".to_string())
                .or_insert_with(|| severity.to_string());
        }

        let record = Alert {
            id,
            name: event.to_string(),
            sender: sender_of(stanza, None, cap.sender_name()),
            headline: cap.headline().map(strip_headline_prefix).filter(|h| !dropped_headline(h)),
            issued,
            expiry,
            message,
            area_desc,
            ugc: codes,
            fips,
            geometry,
            event_motion_description: None,
            alert_info,
            properties: Properties {
                recieved_time: Some(received_time(stanza, now)),
                vtec: None,
                phenomena: None,
                significance: None,
                product_type: stanza.ttaaii.clone(),
                event_tracking_number: None,
            },
        };

        Disposition::Upsert {
            records: vec![record],
            update: false,
        }
    }

    /// The VTEC path: clean, split, and build one record per part.
    #[allow(clippy::too_many_arguments)]
    async fn build_vtec_records(
        &self,
        stanza: &Stanza,
        text: &str,
        v: &Vtec,
        cap: Option<&CapAlert>,
        county: &CountyGeometry,
        resolver: Option<&ZoneResolver>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let issued = v
            .start_time
            .or_else(|| wmo::parse_timestamp(text))
            .or_else(|| cap.and_then(|c| c.sent()))
            .or_else(|| stanza.issue.map(|t| t.with_timezone(&Utc)))
            .unwrap_or(now);
        let expiry = v
            .end_time
            .or_else(|| cap.and_then(|c| c.expires()))
            .filter(|e| *e >= issued);

        let cleaned = cleanup::clean(text);
        let name = self.resolve_name(cap, &cleaned);
        let (headline, cleaned) = self.resolve_headline(cap, &cleaned);

        let base_id = v.key();
        let global_ugc = ugc::find_group(&cleaned).map(|g| ugc::expand(&g)).unwrap_or_default();

        let parts = cleanup::split_parts(&cleaned);
        let multi = parts.len() > 1;

        let mut records = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let id = if multi {
                format!("{}_{}", base_id, index)
            } else {
                base_id.clone()
            };

            let codes = ugc::find_group(part)
                .map(|g| ugc::expand(&g))
                .filter(|codes| !codes.is_empty())
                .unwrap_or_else(|| global_ugc.clone());
            let fips: Vec<String> = codes.iter().filter_map(|c| ugc::to_fips(c)).collect();

            let points = coords::extract(part, cap.and_then(|c| c.polygon()));
            let mut geometry: Vec<Vec<[f64; 2]>> =
                coords::close_ring(&points).into_iter().collect();
            if geometry.is_empty() && !fips.is_empty() {
                geometry = county.rings_for(&fips);
            }

            let event_motion = motion::parse(part, issued, Some(v.phenomena.as_str()));
            if geometry.is_empty() {
                if let Some(m) = &event_motion {
                    geometry = vec![vec![m.coord]];
                }
            }

            if geometry.is_empty() && !self.allow_no_geometry && v.action == ActionCode::New {
                debug!("rejecting geometry-less part {} of {}", index, base_id);
                continue;
            }

            let area_desc = match resolver {
                Some(resolver) => resolver.resolve_area(&codes).await,
                None => None,
            };

            records.push(Alert {
                id,
                name: name.clone(),
                sender: sender_of(stanza, Some(v), cap.and_then(|c| c.sender_name())),
                headline: headline.clone(),
                issued,
                expiry,
                message: part.clone(),
                area_desc,
                ugc: codes,
                fips,
                geometry,
                event_motion_description: event_motion,
                alert_info: sections::extract(part),
                properties: Properties {
                    recieved_time: Some(received_time(stanza, now)),
                    vtec: Some(v.raw.clone()),
                    phenomena: Some(v.phenomena.clone()),
                    significance: Some(v.significance.clone()),
                    product_type: stanza.ttaaii.clone(),
                    event_tracking_number: Some(v.event_tracking_number.clone()),
                },
            });
        }

        records
    }

    /// §4.4(8): CAP event, then the BULLETIN product-name line, then the
    /// best allow-list match, then "Unknown Alert".
    fn resolve_name(&self, cap: Option<&CapAlert>, cleaned: &str) -> String {
        if let Some(event) = cap.and_then(|c| c.event()) {
            return event.to_string();
        }

        if let Some(caps) = BULLETIN_NAME.captures(cleaned) {
            let candidate = caps[1].trim();
            if !candidate.is_empty() {
                return candidate.to_string();
            }
        }

        let lower = cleaned.to_ascii_lowercase();
        let best = self
            .allowed_alerts
            .iter()
            .filter(|name| lower.contains(&name.to_ascii_lowercase()))
            .max_by_key(|name| (name_rank(name), name.len()));
        if let Some(name) = best {
            return name.clone();
        }

        "Unknown Alert".to_string()
    }

    /// §4.4(9): headline selection plus the short-continuation merge. The
    /// merged line is removed from the body, so re-running the builder on
    /// its own output leaves the headline unchanged.
    fn resolve_headline(&self, cap: Option<&CapAlert>, cleaned: &str) -> (Option<String>, String) {
        if let Some(h) = cap.and_then(|c| c.headline()) {
            let h = strip_headline_prefix(h);
            if !dropped_headline(&h) {
                return (Some(h), cleaned.to_string());
            }
        }

        let mut lines: Vec<&str> = cleaned.lines().collect();
        let mut headline = match lines.first() {
            Some(first) if first.contains("BULLETIN") => first
                .trim_start_matches("BULLETIN - ")
                .trim_start_matches("BULLETIN")
                .trim()
                .to_string(),
            _ => String::new(),
        };

        if headline.is_empty() {
            headline = IN_EFFECT_LINE
                .find(cleaned)
                .or_else(|| ALERTISH_LINE.find(cleaned))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
        } else if let Some(second) = lines.get(1).copied() {
            if is_headline_continuation(&headline, second) {
                headline = format!("{} {}", headline, second.trim());
                lines.remove(1);
            }
        }

        if dropped_headline(&headline) {
            return (None, cleaned.to_string());
        }
        (Some(headline), lines.join("\n"))
    }
}

/// Compact textual rendition of a CAP block, preamble preserved.
fn compose_cap_text(cap: &CapAlert) -> String {
    let mut out = String::new();

    if !cap.preamble.is_empty() {
        out.push_str(&cap.preamble);
        out.push_str("\n\n");
    }

    if let Some(sender) = cap.sender_name() {
        let sender = match sender.strip_prefix("NWS ") {
            Some(rest) => format!("National Weather Service {}", rest),
            None => sender.to_string(),
        };
        out.push_str(&sender);
        out.push('\n');
    }

    if let Some(v) = cap.vtec() {
        out.push_str(v.trim());
        out.push('\n');
    }

    if let Some(sent) = cap.sent() {
        out.push_str(&sent.format("%-I%M %p UTC %a %b %-d %Y").to_string());
        out.push('\n');
    }

    if let Some(description) = cap.description() {
        out.push('\n');
        out.push_str(description.trim());
        out.push('\n');
    }

    if let Some(instruction) = cap.instruction() {
        out.push('\n');
        out.push_str(instruction.trim());
        out.push('\n');
    }

    if let Some(polygon) = cap.polygon() {
        let tokens: Vec<String> = coords::parse_cap_polygon(polygon)
            .into_iter()
            .map(|(lat, lon)| {
                format!(
                    "{:.0} {:.0}",
                    (lat * 100.0).round(),
                    (lon.abs() * 100.0).round()
                )
            })
            .collect();
        if !tokens.is_empty() {
            out.push('\n');
            out.push_str("LAT...LON ");
            out.push_str(&tokens.join(" "));
            out.push('\n');
        }
    }

    out
}

/// Decode a VTEC from the body with the CAP block blanked out, so an inline
/// legacy VTEC can be told apart from the CAP parameter copy.
fn decode_outside_cap(body: &str, cap: &CapAlert) -> Option<Vtec> {
    let (open, close) = cap.span;
    let mut outside = String::with_capacity(body.len());
    outside.push_str(&body[..open]);
    outside.push_str(&body[close.min(body.len())..]);
    vtec::decode(&outside)
}

fn decode_param(raw: &str) -> Option<Vtec> {
    vtec::decode(&format!("/{}/", raw.trim().trim_matches('/')))
}

/// UGC identifiers for the non-VTEC path come from wherever they can be
/// found: geocodes, the UGC parameter, the preamble, and the raw body.
fn gather_non_vtec_ugc(cap: &CapAlert, body: &str) -> Vec<String> {
    let mut codes = cap.ugc_codes();

    let mut merge = |more: Vec<String>| {
        for code in more {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    };

    if let Some(param) = cap.parameter("UGC") {
        merge(
            param
                .split([' ', ',', ';'])
                .filter(|s| UGC_SHAPED.is_match(s))
                .map(String::from)
                .collect(),
        );
    }
    if let Some(group) = ugc::find_group(&cap.preamble) {
        merge(ugc::expand(&group));
    }
    if let Some(group) = ugc::find_group(body) {
        merge(ugc::expand(&group));
    }

    codes
}

fn sender_of(stanza: &Stanza, v: Option<&Vtec>, sender_name: Option<&str>) -> String {
    if let Some(cccc) = &stanza.cccc {
        return cccc.clone();
    }
    if let Some(v) = v {
        return v.office.clone();
    }
    sender_name.unwrap_or_default().to_string()
}

fn received_time(stanza: &Stanza, now: DateTime<Utc>) -> DateTime<Utc> {
    stanza
        .delay_stamp
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now)
}

fn synthesize_id(stanza: &Stanza) -> String {
    format!(
        "{}{}{}",
        stanza.ttaaii.as_deref().unwrap_or("UNK"),
        stanza.cccc.as_deref().unwrap_or("UNKN"),
        uuid::Uuid::new_v4().to_simple()
    )
}

fn strip_headline_prefix(headline: &str) -> String {
    headline
        .trim()
        .strip_prefix("NWSheadline ")
        .unwrap_or(headline.trim())
        .to_string()
}

/// Headlines that are nothing but digits and punctuation carry no meaning.
fn dropped_headline(headline: &str) -> bool {
    let h = headline.trim();
    h.is_empty() || (h.len() < 16 && DIGITS_ONLY.is_match(h))
}

const CONNECTORS: &[&str] = &["FOR", "IN", "OF", "TO", "AND", "UNTIL", "..."];

fn is_headline_continuation(headline: &str, second: &str) -> bool {
    let second = second.trim();
    second.len() < 60
        && !second.is_empty()
        && !UGC_SHAPED.is_match(second)
        && second == second.to_ascii_uppercase()
        && second.chars().any(|c| c.is_ascii_alphabetic())
        && CONNECTORS.iter().any(|c| headline.trim_end().ends_with(c))
}

fn name_rank(name: &str) -> u8 {
    let lower = name.to_ascii_lowercase();
    if lower.contains("warning") {
        4
    } else if lower.contains("watch") {
        3
    } else if lower.contains("advisory") {
        2
    } else if lower.contains("statement") {
        1
    } else {
        0
    }
}
