//! Zone-name resolution against api.weather.gov.
//!
//! A UGC identifier maps to a human-readable zone or county name via
//! `https://api.weather.gov/zones/{kind}/{id}`. Lookups are memoized for
//! the life of the process, negatives included; a resolver failure never
//! fails the alert that asked.

use dashmap::DashMap;
use futures::future::join_all;
use log::debug;
use serde::Deserialize;
use std::time::Duration;

const USER_AGENT: &str = "SparkAlerts";
const ACCEPT: &str = "application/geo+json, application/json";

#[derive(Debug, Deserialize)]
struct ZoneResponse {
    properties: ZoneProperties,
}

#[derive(Debug, Deserialize)]
struct ZoneProperties {
    name: Option<String>,
    state: Option<String>,
}

pub struct ZoneResolver {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<String, Option<String>>,
}

impl ZoneResolver {
    pub fn new() -> Self {
        Self::with_base_url("https://api.weather.gov")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: DashMap::new(),
        }
    }

    /// Resolve one UGC id to a display name, or `None`.
    ///
    /// Counties (`..C###`) query the county zone type and render as
    /// `"{name}, {state}"`; everything else tries `forecast` then `fire`.
    pub async fn resolve(&self, id: &str) -> Option<String> {
        if let Some(hit) = self.cache.get(id) {
            return hit.clone();
        }

        let resolved = self.resolve_uncached(id).await;
        self.cache.insert(id.to_string(), resolved.clone());
        resolved
    }

    async fn resolve_uncached(&self, id: &str) -> Option<String> {
        let is_county = id.as_bytes().get(2) == Some(&b'C');
        let kinds: &[&str] = if is_county {
            &["county"]
        } else {
            &["forecast", "fire"]
        };

        for kind in kinds {
            if let Some(properties) = self.fetch(kind, id).await {
                return match (is_county, properties.name, properties.state) {
                    (true, Some(name), Some(state)) => Some(format!("{}, {}", name, state)),
                    (_, Some(name), _) => Some(name),
                    _ => None,
                };
            }
        }
        None
    }

    async fn fetch(&self, kind: &str, id: &str) -> Option<ZoneProperties> {
        let url = format!("{}/zones/{}/{}", self.base_url, kind, id);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => response
                .json::<ZoneResponse>()
                .await
                .map(|body| body.properties)
                .ok(),
            Ok(response) => {
                debug!("zone lookup {} returned {}", url, response.status());
                None
            }
            Err(e) => {
                debug!("zone lookup {} failed: {}", url, e);
                None
            }
        }
    }

    /// Resolve many ids in parallel and join the hits with `"; "`.
    pub async fn resolve_area(&self, ids: &[String]) -> Option<String> {
        let names: Vec<String> = join_all(ids.iter().map(|id| self.resolve(id)))
            .await
            .into_iter()
            .flatten()
            .collect();

        if names.is_empty() {
            None
        } else {
            Some(names.join("; "))
        }
    }
}

impl Default for ZoneResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn county_detection() {
        assert_eq!("CAC073".as_bytes().get(2), Some(&b'C'));
        assert_eq!("CAZ043".as_bytes().get(2), Some(&b'Z'));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_negative_and_cached() {
        let resolver = ZoneResolver::with_base_url("http://127.0.0.1:9");
        assert_eq!(resolver.resolve("CAC073").await, None);
        // second call hits the cache
        assert!(resolver.cache.contains_key("CAC073"));
        assert_eq!(resolver.resolve("CAC073").await, None);
    }

    #[tokio::test]
    async fn empty_area() {
        let resolver = ZoneResolver::with_base_url("http://127.0.0.1:9");
        assert_eq!(resolver.resolve_area(&[]).await, None);
    }
}
