//! The normalized alert record served to API consumers.
//!
//! Field names here are the wire contract, `recievedTime` spelling
//! included. Empty and placeholder values are omitted from the JSON rather
//! than serialized empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub name: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    pub issued: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    pub message: String,
    #[serde(rename = "areaDesc", default, skip_serializing_if = "Option::is_none")]
    pub area_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ugc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fips: Vec<String>,
    /// Polygon rings of `[lon, lat]` positions, first = last.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geometry: Vec<Vec<[f64; 2]>>,
    #[serde(
        rename = "eventMotionDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub event_motion_description: Option<EventMotion>,
    #[serde(rename = "alertInfo", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alert_info: BTreeMap<String, String>,
    pub properties: Properties,
}

impl Alert {
    /// Whether this record was produced from the given VTEC key, directly or
    /// as one part of a split message (`<key>_<idx>`).
    pub fn matches_vtec_key(&self, key: &str) -> bool {
        self.id == key || self.id.starts_with(&format!("{}_", key))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if expiry < now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    Storm,
    Tornado,
    Flood,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMotion {
    pub raw: String,
    #[serde(rename = "timeIso", default, skip_serializing_if = "Option::is_none")]
    pub time_iso: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: MotionKind,
    #[serde(rename = "headingDeg")]
    pub heading_deg: f64,
    #[serde(rename = "speedKt")]
    pub speed_kt: f64,
    pub lat: f64,
    pub lon: f64,
    /// `[lon, lat]`, matching the geometry convention.
    pub coord: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Properties {
    /// Wire-compatible spelling.
    #[serde(rename = "recievedTime", default, skip_serializing_if = "Option::is_none")]
    pub recieved_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phenomena: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_tracking_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minimal() -> Alert {
        Alert {
            id: "KSGX.TO.W.0002".into(),
            name: "Tornado Warning".into(),
            sender: "KSGX".into(),
            headline: None,
            issued: Utc.with_ymd_and_hms(2026, 2, 13, 3, 40, 0).unwrap(),
            expiry: None,
            message: "text".into(),
            area_desc: None,
            ugc: Vec::new(),
            fips: Vec::new(),
            geometry: Vec::new(),
            event_motion_description: None,
            alert_info: BTreeMap::new(),
            properties: Properties::default(),
        }
    }

    #[test]
    fn empty_fields_are_omitted() {
        let json = serde_json::to_string(&minimal()).unwrap();
        assert!(!json.contains("headline"));
        assert!(!json.contains("expiry"));
        assert!(!json.contains("ugc"));
        assert!(!json.contains("geometry"));
        assert!(!json.contains("alertInfo"));
        assert!(!json.contains("eventMotionDescription"));
    }

    #[test]
    fn wire_names() {
        let mut alert = minimal();
        alert.area_desc = Some("San Diego County, CA".into());
        alert.properties.recieved_time = Some(alert.issued);
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"areaDesc\""));
        assert!(json.contains("\"recievedTime\""));
    }

    #[test]
    fn vtec_key_matching() {
        let mut alert = minimal();
        assert!(alert.matches_vtec_key("KSGX.TO.W.0002"));
        assert!(!alert.matches_vtec_key("KSGX.TO.W.0003"));
        alert.id = "KSGX.TO.W.0002_1".into();
        assert!(alert.matches_vtec_key("KSGX.TO.W.0002"));
    }

    #[test]
    fn expiry_check() {
        let mut alert = minimal();
        let now = Utc.with_ymd_and_hms(2026, 2, 13, 5, 0, 0).unwrap();
        assert!(!alert.is_expired(now));
        alert.expiry = Some(Utc.with_ymd_and_hms(2026, 2, 13, 4, 15, 0).unwrap());
        assert!(alert.is_expired(now));
    }

    #[test]
    fn round_trips() {
        let mut alert = minimal();
        alert.geometry = vec![vec![[-117.02, 34.58], [-117.04, 34.60], [-117.02, 34.62], [-117.02, 34.58]]];
        let json = serde_json::to_string_pretty(&alert).unwrap();
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert, back);
    }
}
