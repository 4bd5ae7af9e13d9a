//! Coordinate extraction from product text.
//!
//! Preference order: the `LAT...LON` token block, then decimal `lat,lon`
//! pairs, then a caller-supplied CAP polygon string. `LAT...LON` values are
//! hundredths of a degree with an implied western-hemisphere longitude.

use once_cell::sync::Lazy;
use regex::Regex;

static LAT_LON_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"LAT\.\.\.LON((?:\s+\d{4,5}\b)+)").unwrap());
static DECIMAL_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-?\d{1,3}\.\d+)[, ]\s*(-?\d{1,3}\.\d+)").unwrap());

/// Extract an ordered list of `(lat, lon)` pairs from `text`, falling back
/// to a CAP `<polygon>` value when the text itself carries none.
pub fn extract(text: &str, cap_polygon: Option<&str>) -> Vec<(f64, f64)> {
    let from_block = lat_lon_block(text);
    if !from_block.is_empty() {
        return from_block;
    }

    let from_decimal = decimal_pairs(text);
    if !from_decimal.is_empty() {
        return from_decimal;
    }

    cap_polygon.map(parse_cap_polygon).unwrap_or_default()
}

/// `LAT...LON 3458 11702 3460 11704` → `[(34.58, -117.02), (34.60, -117.04)]`.
///
/// Four-digit longitudes read as `DD.DD`, five-digit as `DDD.DD`, always
/// negated. The block may wrap across lines.
fn lat_lon_block(text: &str) -> Vec<(f64, f64)> {
    let Some(caps) = LAT_LON_BLOCK.captures(text) else {
        return Vec::new();
    };

    let tokens: Vec<f64> = caps[1]
        .split_whitespace()
        .filter_map(|t| t.parse::<f64>().ok())
        .collect();

    tokens
        .chunks_exact(2)
        .map(|pair| (pair[0] / 100.0, -(pair[1] / 100.0)))
        .collect()
}

fn decimal_pairs(text: &str) -> Vec<(f64, f64)> {
    DECIMAL_PAIR
        .captures_iter(text)
        .filter_map(|caps| {
            let lat: f64 = caps[1].parse().ok()?;
            let lon: f64 = caps[2].parse().ok()?;
            (lat.abs() <= 90.0 && lon.abs() <= 180.0).then_some((lat, lon))
        })
        .collect()
}

/// CAP polygons are space-separated `lat,lon` pairs.
pub fn parse_cap_polygon(polygon: &str) -> Vec<(f64, f64)> {
    polygon
        .split_whitespace()
        .filter_map(|pair| {
            let (lat, lon) = pair.split_once(',')?;
            Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
        })
        .collect()
}

/// Convert `(lat, lon)` points into a closed GeoJSON-style ring of
/// `[lon, lat]` positions. Rings with fewer than 3 distinct points are
/// discarded.
pub fn close_ring(points: &[(f64, f64)]) -> Option<Vec<[f64; 2]>> {
    let mut distinct: Vec<[f64; 2]> = Vec::new();
    for &(lat, lon) in points {
        let position = [lon, lat];
        if !distinct.contains(&position) {
            distinct.push(position);
        }
    }
    if distinct.len() < 3 {
        return None;
    }

    let mut ring: Vec<[f64; 2]> = points.iter().map(|&(lat, lon)| [lon, lat]).collect();
    if ring.first() != ring.last() {
        ring.push(ring[0]);
    }
    Some(ring)
}
