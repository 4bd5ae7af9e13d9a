//! County polygon overlay.
//!
//! `fips_county_geometry.json` is a prepackaged lookup of county FIPS →
//! polygon rings, used when a product names counties but carries no
//! `LAT...LON` block of its own.

use log::warn;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CountyEntry {
    #[serde(default)]
    geometry: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Default)]
pub struct CountyGeometry {
    counties: HashMap<String, Vec<Vec<[f64; 2]>>>,
}

impl CountyGeometry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the lookup file. A missing or unreadable file logs a warning
    /// and yields an empty overlay; geometry enrichment is best-effort.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("county geometry file {} unavailable: {}", path.display(), e);
                return Self::empty();
            }
        };

        match serde_json::from_str::<HashMap<String, CountyEntry>>(&raw) {
            Ok(entries) => Self {
                counties: entries
                    .into_iter()
                    .map(|(fips, entry)| (fips, entry.geometry))
                    .collect(),
            },
            Err(e) => {
                warn!("county geometry file {} malformed: {}", path.display(), e);
                Self::empty()
            }
        }
    }

    /// Rings for every known county in `fips`, in input order, closed.
    pub fn rings_for(&self, fips: &[String]) -> Vec<Vec<[f64; 2]>> {
        let mut rings = Vec::new();
        for code in fips {
            if let Some(county) = self.counties.get(code) {
                for ring in county {
                    if ring.len() < 3 {
                        continue;
                    }
                    let mut ring = ring.clone();
                    if ring.first() != ring.last() {
                        ring.push(ring[0]);
                    }
                    rings.push(ring);
                }
            }
        }
        rings
    }

    pub fn len(&self) -> usize {
        self.counties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_closes_rings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"06073": {{"geometry": [[[-117.0, 33.0], [-116.9, 33.0], [-116.9, 33.1]]]}}}}"#
        )
        .unwrap();

        let lookup = CountyGeometry::load(file.path());
        assert_eq!(lookup.len(), 1);

        let rings = lookup.rings_for(&["06073".to_string(), "48439".to_string()]);
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].first(), rings[0].last());
        assert_eq!(rings[0].len(), 4);
    }

    #[test]
    fn missing_file_is_empty() {
        let lookup = CountyGeometry::load(Path::new("/nonexistent/geometry.json"));
        assert!(lookup.is_empty());
    }
}
