//! Valid Time Event Code decoding.
//!
//! A P-VTEC string looks like
//! `/O.NEW.KSGX.TO.W.0002.260213T0340Z-260213T0415Z/`: product class,
//! action, issuing office, phenomena, significance, event tracking number,
//! and a start/end time pair. The same payload sometimes arrives as a CAP
//! `<parameter>` named `VTEC` instead of inline text.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductClass {
    Operational,
    Test,
    Experimental,
    ExperimentalVtec,
}

impl ProductClass {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'O' => Some(Self::Operational),
            'T' => Some(Self::Test),
            'E' => Some(Self::Experimental),
            'X' => Some(Self::ExperimentalVtec),
            _ => None,
        }
    }
}

/// The closed set of VTEC action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCode {
    New,
    Continue,
    ExtendTime,
    ExtendArea,
    ExtendBoth,
    Upgrade,
    Cancel,
    Expire,
    Correct,
    Routine,
}

impl FromStr for ActionCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "CON" => Ok(Self::Continue),
            "EXT" => Ok(Self::ExtendTime),
            "EXA" => Ok(Self::ExtendArea),
            "EXB" => Ok(Self::ExtendBoth),
            "UPG" => Ok(Self::Upgrade),
            "CAN" => Ok(Self::Cancel),
            "EXP" => Ok(Self::Expire),
            "COR" => Ok(Self::Correct),
            "ROU" => Ok(Self::Routine),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Continue => "CON",
            Self::ExtendTime => "EXT",
            Self::ExtendArea => "EXA",
            Self::ExtendBoth => "EXB",
            Self::Upgrade => "UPG",
            Self::Cancel => "CAN",
            Self::Expire => "EXP",
            Self::Correct => "COR",
            Self::Routine => "ROU",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vtec {
    pub raw: String,
    pub product_class: ProductClass,
    pub action: ActionCode,
    pub office: String,
    pub phenomena: String,
    pub significance: String,
    pub event_tracking_number: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Vtec {
    /// The canonical identity `office.phenomena.significance.etn`, e.g.
    /// `KSGX.TO.W.0002`.
    pub fn key(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.office, self.phenomena, self.significance, self.event_tracking_number
        )
    }
}

static LEGACY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/([OTEX]\.[A-Z]{3}\.[A-Z]{4}\.[A-Z]{2}\.[A-Z]\.\d{4}\.\d{6}T\d{4}Z-\d{6}T\d{4}Z)/")
        .unwrap()
});

static CAP_PARAMETER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<valueName>\s*VTEC\s*</valueName>\s*<value>\s*/?([^</]+?)/?\s*</value>")
        .unwrap()
});

/// Find and decode the first VTEC in `text`, legacy slash form or CAP
/// parameter form. Malformed payloads yield `None`.
pub fn decode(text: &str) -> Option<Vtec> {
    let payload = LEGACY
        .captures(text)
        .or_else(|| CAP_PARAMETER.captures(text))
        .and_then(|c| c.get(1))?
        .as_str();

    decode_payload(payload)
}

fn decode_payload(payload: &str) -> Option<Vtec> {
    let fields: Vec<&str> = payload.split('.').collect();
    if fields.len() != 7 {
        return None;
    }

    let product_class = ProductClass::from_char(fields[0].chars().next()?)?;
    let action = fields[1].parse().ok()?;
    let office = fields[2];
    let phenomena = fields[3];
    let significance = fields[4];
    let etn = fields[5];

    if office.len() != 4 || phenomena.len() != 2 || significance.len() != 1 || etn.len() != 4 {
        return None;
    }

    let (start, end) = fields[6].split_once('-')?;

    Some(Vtec {
        raw: format!("/{}/", payload),
        product_class,
        action,
        office: office.to_string(),
        phenomena: phenomena.to_string(),
        significance: significance.to_string(),
        event_tracking_number: etn.to_string(),
        start_time: parse_vtec_time(start),
        end_time: parse_vtec_time(end),
    })
}

/// `YYMMDDTHHMMZ` as UTC. The all-zeros placeholder means "until further
/// notice" and decodes to `None`.
fn parse_vtec_time(token: &str) -> Option<DateTime<Utc>> {
    if token == "000000T0000Z" || token.len() != 12 {
        return None;
    }
    let year = 2000 + token[0..2].parse::<i32>().ok()?;
    let month = token[2..4].parse().ok()?;
    let day = token[4..6].parse().ok()?;
    let hour = token[7..9].parse().ok()?;
    let minute = token[9..11].parse().ok()?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_legacy() {
        let v = decode("/O.NEW.KSGX.TO.W.0002.260213T0340Z-260213T0415Z/").unwrap();
        assert_eq!(v.product_class, ProductClass::Operational);
        assert_eq!(v.action, ActionCode::New);
        assert_eq!(v.office, "KSGX");
        assert_eq!(v.phenomena, "TO");
        assert_eq!(v.significance, "W");
        assert_eq!(v.event_tracking_number, "0002");
        assert_eq!(v.key(), "KSGX.TO.W.0002");
        assert_eq!(
            v.start_time.unwrap().to_rfc3339(),
            "2026-02-13T03:40:00+00:00"
        );
        assert_eq!(
            v.end_time.unwrap().to_rfc3339(),
            "2026-02-13T04:15:00+00:00"
        );
    }

    #[test]
    fn decode_embedded_in_product() {
        let body = "WFUS54 KSGX 130340\nTORSGX\n\nBULLETIN - EAS ACTIVATION REQUESTED\n/O.CON.KSGX.TO.W.0002.000000T0000Z-260213T0415Z/\n\nA tornado warning remains in effect...";
        let v = decode(body).unwrap();
        assert_eq!(v.action, ActionCode::Continue);
        assert_eq!(v.start_time, None);
        assert!(v.end_time.is_some());
    }

    #[test]
    fn decode_cap_parameter() {
        let xml = "<parameter><valueName>VTEC</valueName><value>/O.EXP.KBOU.WW.Y.0011.000000T0000Z-260214T0000Z/</value></parameter>";
        let v = decode(xml).unwrap();
        assert_eq!(v.action, ActionCode::Expire);
        assert_eq!(v.key(), "KBOU.WW.Y.0011");
    }

    #[test]
    fn unknown_action_is_none() {
        assert!(decode("/O.XXX.KSGX.TO.W.0002.260213T0340Z-260213T0415Z/").is_none());
    }

    #[test]
    fn no_vtec() {
        assert!(decode("Some regular weather statement with no codes.").is_none());
    }
}
