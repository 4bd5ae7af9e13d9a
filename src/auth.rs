//! Request authentication and rate limiting.
//!
//! Protected routes admit a request through an ordered series of checks:
//! origin allow-list, optional no-origin bypass, then a signed bearer key
//! whose `X-Signature` must be the HMAC-SHA256 of
//! `timestamp || method || path` under the key itself, with the timestamp
//! within five minutes of now. Admitted requests then pass a windowed
//! per-key-per-ip counter.

use crate::config::{ApiKey, Config};
use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use log::debug;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const TIMESTAMP_TOLERANCE_MS: i64 = 5 * 60 * 1000;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthorized(&'static str),
    RateLimited,
}

struct RateEntry {
    count: u32,
    window_start_ms: i64,
}

#[derive(Clone)]
pub struct AuthGate {
    api_keys: Arc<HashMap<String, ApiKey>>,
    domain_whitelist: Arc<Vec<String>>,
    allow_no_origin: bool,
    window_ms: i64,
    default_max: u32,
    counters: Arc<DashMap<String, RateEntry>>,
    last_used: Arc<DashMap<String, DateTime<Utc>>>,
}

impl AuthGate {
    pub fn new(config: &Config) -> Self {
        Self {
            api_keys: Arc::new(config.api_keys.clone()),
            domain_whitelist: Arc::new(config.domain_whitelist.clone()),
            allow_no_origin: config.allow_no_origin,
            window_ms: config.rate_limit.window_ms.max(1) as i64,
            default_max: config.rate_limit.default_max,
            counters: Arc::new(DashMap::new()),
            last_used: Arc::new(DashMap::new()),
        }
    }

    /// Whether `origin` matches the configured allow-list.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.domain_whitelist
            .iter()
            .any(|domain| origin.contains(domain.as_str()))
    }

    /// Run the ordered §auth checks for one request.
    pub fn check(
        &self,
        headers: &HeaderMap,
        method: &Method,
        path: &str,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Denial> {
        let key = self.authenticate(headers, method, path, now)?;
        self.rate_limit(key.as_deref(), client_ip, now)
    }

    /// The identity checks: returns the admitted API key, or `None` for an
    /// origin-based pass.
    fn authenticate(
        &self,
        headers: &HeaderMap,
        method: &Method,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, Denial> {
        let origin = header_str(headers, "origin").or_else(|| header_str(headers, "referer"));

        if let Some(origin) = origin {
            if self.origin_allowed(origin) {
                return Ok(None);
            }
        } else if self.allow_no_origin {
            return Ok(None);
        }

        let bearer = header_str(headers, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(Denial::Unauthorized("Missing bearer token"))?;

        let entry = self
            .api_keys
            .get(bearer)
            .filter(|k| k.active)
            .ok_or(Denial::Unauthorized("Invalid or inactive API key"))?;

        let timestamp = header_str(headers, "x-request-time")
            .ok_or(Denial::Unauthorized("Missing request timestamp"))?;
        let timestamp_ms: i64 = timestamp
            .parse()
            .map_err(|_| Denial::Unauthorized("Malformed request timestamp"))?;
        if (now.timestamp_millis() - timestamp_ms).abs() > TIMESTAMP_TOLERANCE_MS {
            return Err(Denial::Unauthorized("Stale request timestamp"));
        }

        let signature = header_str(headers, "x-signature")
            .ok_or(Denial::Unauthorized("Missing signature"))?;
        if !verify_signature(bearer, timestamp, method.as_str(), path, signature) {
            debug!("bad signature for key {} on {} {}", entry.name, method, path);
            return Err(Denial::Unauthorized("Bad signature"));
        }

        self.last_used.insert(bearer.to_string(), now);
        Ok(Some(bearer.to_string()))
    }

    fn rate_limit(
        &self,
        key: Option<&str>,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Denial> {
        let max = key
            .and_then(|k| self.api_keys.get(k))
            .and_then(|k| k.rate_limit)
            .unwrap_or(self.default_max);

        let counter_key = format!("{}_{}", key.unwrap_or("anonymous"), client_ip);
        let now_ms = now.timestamp_millis();

        let mut entry = self.counters.entry(counter_key).or_insert(RateEntry {
            count: 0,
            window_start_ms: now_ms,
        });
        if now_ms - entry.window_start_ms >= self.window_ms {
            entry.count = 0;
            entry.window_start_ms = now_ms;
        }
        entry.count += 1;

        if entry.count > max {
            return Err(Denial::RateLimited);
        }
        Ok(())
    }

    /// When a key last passed authentication, for operator introspection.
    pub fn last_used(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_used.get(key).map(|t| *t)
    }
}

/// Compute the lowercase-hex request signature for a key.
pub fn sign(key: &str, timestamp: &str, method: &str, path: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_signature(key: &str, timestamp: &str, method: &str, path: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn gate(window_ms: u64, default_max: u32) -> AuthGate {
        let mut config = Config::default();
        config.domain_whitelist = vec!["dashboard.example.com".into()];
        config.api_keys.insert(
            "secret-key".into(),
            ApiKey {
                name: "test".into(),
                rate_limit: None,
                active: true,
                ..ApiKey::default()
            },
        );
        config.api_keys.insert(
            "disabled-key".into(),
            ApiKey {
                name: "old".into(),
                active: false,
                ..ApiKey::default()
            },
        );
        config.rate_limit.window_ms = window_ms;
        config.rate_limit.default_max = default_max;
        AuthGate::new(&config)
    }

    fn signed_headers(key: &str, timestamp: &str, method: &str, path: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", key)).unwrap(),
        );
        headers.insert("x-request-time", HeaderValue::from_str(timestamp).unwrap());
        headers.insert(
            "x-signature",
            HeaderValue::from_str(&sign(key, timestamp, method, path)).unwrap(),
        );
        headers
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn origin_match_passes_without_bearer() {
        let gate = gate(60_000, 100);
        let mut headers = HeaderMap::new();
        headers.insert(
            "origin",
            HeaderValue::from_static("https://dashboard.example.com"),
        );
        assert!(gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", now()).is_ok());
    }

    #[test]
    fn missing_bearer_rejected() {
        let gate = gate(60_000, 100);
        let headers = HeaderMap::new();
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", now()),
            Err(Denial::Unauthorized("Missing bearer token"))
        );
    }

    #[test]
    fn valid_signature_admitted() {
        let gate = gate(60_000, 100);
        let n = now();
        let ts = n.timestamp_millis().to_string();
        let headers = signed_headers("secret-key", &ts, "GET", "/alerts");
        assert!(gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n).is_ok());
        assert!(gate.last_used("secret-key").is_some());
    }

    #[test]
    fn tampering_with_any_input_rejects() {
        let gate = gate(60_000, 100);
        let n = now();
        let ts = n.timestamp_millis().to_string();

        // wrong path in signature
        let headers = signed_headers("secret-key", &ts, "GET", "/other");
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n),
            Err(Denial::Unauthorized("Bad signature"))
        );

        // wrong method in signature
        let headers = signed_headers("secret-key", &ts, "POST", "/alerts");
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n),
            Err(Denial::Unauthorized("Bad signature"))
        );

        // flipped signature bit
        let mut headers = signed_headers("secret-key", &ts, "GET", "/alerts");
        let mut sig = headers["x-signature"].to_str().unwrap().to_string();
        let flipped = if sig.ends_with('0') { "1" } else { "0" };
        sig.replace_range(sig.len() - 1.., flipped);
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n),
            Err(Denial::Unauthorized("Bad signature"))
        );

        // altered timestamp after signing
        let stale = (n.timestamp_millis() - 1).to_string();
        let mut headers = signed_headers("secret-key", &ts, "GET", "/alerts");
        headers.insert("x-request-time", HeaderValue::from_str(&stale).unwrap());
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n),
            Err(Denial::Unauthorized("Bad signature"))
        );
    }

    #[test]
    fn stale_timestamp_rejected() {
        let gate = gate(60_000, 100);
        let n = now();
        let ts = (n.timestamp_millis() - 6 * 60 * 1000).to_string();
        let headers = signed_headers("secret-key", &ts, "GET", "/alerts");
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n),
            Err(Denial::Unauthorized("Stale request timestamp"))
        );
    }

    #[test]
    fn inactive_key_rejected() {
        let gate = gate(60_000, 100);
        let n = now();
        let ts = n.timestamp_millis().to_string();
        let headers = signed_headers("disabled-key", &ts, "GET", "/alerts");
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n),
            Err(Denial::Unauthorized("Invalid or inactive API key"))
        );
    }

    #[test]
    fn rate_limit_trips_and_resets() {
        let gate = gate(60_000, 2);
        let n = now();
        let ts = n.timestamp_millis().to_string();
        let headers = signed_headers("secret-key", &ts, "GET", "/alerts");

        assert!(gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n).is_ok());
        assert!(gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n).is_ok());
        assert_eq!(
            gate.check(&headers, &Method::GET, "/alerts", "1.2.3.4", n),
            Err(Denial::RateLimited)
        );

        // another client ip has its own window
        assert!(gate.check(&headers, &Method::GET, "/alerts", "5.6.7.8", n).is_ok());

        // a new window clears the counter
        let later = n + chrono::Duration::milliseconds(61_000);
        let ts2 = later.timestamp_millis().to_string();
        let headers2 = signed_headers("secret-key", &ts2, "GET", "/alerts");
        assert!(gate.check(&headers2, &Method::GET, "/alerts", "1.2.3.4", later).is_ok());
    }
}
