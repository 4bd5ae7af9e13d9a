use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_RESOURCE: &str = "SparkAlerts NWWS Ingest Client";

/// Service configuration: a JSON file merged with the environment.
///
/// The file is optional; every key has a default except the XMPP
/// credentials, which must come from the file or (preferably) from
/// `XMPP_USERNAME` / `XMPP_PASSWORD`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub xmpp_username: Option<String>,
    pub xmpp_password: Option<String>,
    pub nwwsoi: NwwsOi,
    pub express_port: u16,
    pub api_keys: HashMap<String, ApiKey>,
    pub domain_whitelist: Vec<String>,
    pub allow_no_origin: bool,
    pub allow_no_geometry: bool,
    pub allowed_alerts: Vec<String>,
    pub rate_limit: RateLimit,
    pub alerts_file: PathBuf,
    pub county_geometry_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xmpp_username: None,
            xmpp_password: None,
            nwwsoi: NwwsOi::default(),
            express_port: 8433,
            api_keys: HashMap::new(),
            domain_whitelist: Vec::new(),
            allow_no_origin: false,
            allow_no_geometry: false,
            allowed_alerts: Vec::new(),
            rate_limit: RateLimit::default(),
            alerts_file: PathBuf::from("alerts.json"),
            county_geometry_file: PathBuf::from("fips_county_geometry.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NwwsOi {
    pub resource: String,
    pub server: Server,
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds; doubles per attempt.
    pub initial_reconnect_delay: u64,
}

impl Default for NwwsOi {
    fn default() -> Self {
        Self {
            resource: DEFAULT_RESOURCE.to_string(),
            server: Server::Primary,
            max_reconnect_attempts: 10,
            initial_reconnect_delay: 2000,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(from = "String")]
pub enum Server {
    Primary,
    Backup,
    Custom(String),
}

impl Server {
    pub fn hostname(&self) -> &str {
        match self {
            Server::Primary => "nwws-oi.weather.gov",
            Server::Backup => "nwws-oi-md.weather.gov",
            Server::Custom(name) => name,
        }
    }
}

impl From<String> for Server {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "primary" => Server::Primary,
            "backup" => Server::Backup,
            _ => Server::Custom(value),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiKey {
    pub name: String,
    pub rate_limit: Option<u32>,
    pub active: bool,
    pub last_used: Option<String>,
}

impl Default for ApiKey {
    fn default() -> Self {
        Self {
            name: String::new(),
            rate_limit: None,
            active: true,
            last_used: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimit {
    /// Window length in milliseconds. The historical default is `15 * 60`
    /// literal milliseconds; set `900000` for a true 15-minute window.
    pub window_ms: u64,
    pub default_max: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window_ms: 15 * 60,
            default_max: 100,
        }
    }
}

impl Config {
    /// Load from `SPARKALERTS_CONFIG` (default `config.json`) and the
    /// environment, and verify the credentials are present.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SPARKALERTS_CONFIG").unwrap_or_else(|_| "config.json".into());
        let mut config = Self::from_file(Path::new(&path))?;

        if let Ok(username) = std::env::var("XMPP_USERNAME") {
            config.xmpp_username = Some(username);
        }
        if let Ok(password) = std::env::var("XMPP_PASSWORD") {
            config.xmpp_password = Some(password);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Configuration(format!("{}: {}", path.display(), e))),
        }
    }

    fn validate(&self) -> Result<()> {
        match (&self.xmpp_username, &self.xmpp_password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Ok(()),
            _ => Err(Error::Configuration(
                "XMPP_USERNAME and XMPP_PASSWORD must be set".into(),
            )),
        }
    }

    pub(crate) fn jid(&self) -> String {
        format!(
            "{}@{}/{}",
            self.xmpp_username.as_deref().unwrap_or_default(),
            self.nwwsoi.server.hostname(),
            &self.nwwsoi.resource,
        )
    }

    /// The MUC occupant JID: room plus our nickname.
    pub(crate) fn muc_jid(&self) -> jid::FullJid {
        jid::FullJid::new(&format!(
            "nwws@conference.nwws-oi.weather.gov/{}",
            self.nwwsoi.resource
        ))
        .expect("muc jid is always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.express_port, 8433);
        assert_eq!(config.nwwsoi.resource, DEFAULT_RESOURCE);
        assert_eq!(config.nwwsoi.max_reconnect_attempts, 10);
        assert_eq!(config.nwwsoi.initial_reconnect_delay, 2000);
        assert_eq!(config.rate_limit.window_ms, 900);
        assert_eq!(config.nwwsoi.server.hostname(), "nwws-oi.weather.gov");
    }

    #[test]
    fn parses_file_shape() {
        let raw = r#"{
            "xmppUsername": "user",
            "xmppPassword": "pass",
            "nwwsoi": {"resource": "test client", "server": "backup", "maxReconnectAttempts": 3},
            "expressPort": 9000,
            "apiKeys": {"abc123": {"name": "dashboard", "rateLimit": 50, "active": true}},
            "domainWhitelist": ["example.com"],
            "allowNoOrigin": true,
            "allowedAlerts": ["Special Weather Statement"],
            "rateLimit": {"windowMs": 900000, "defaultMax": 10}
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.express_port, 9000);
        assert_eq!(config.nwwsoi.server, Server::Backup);
        assert_eq!(config.nwwsoi.max_reconnect_attempts, 3);
        assert_eq!(config.api_keys["abc123"].rate_limit, Some(50));
        assert!(config.allow_no_origin);
        assert_eq!(config.rate_limit.window_ms, 900_000);
    }

    #[test]
    fn missing_credentials_rejected() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn jid_shape() {
        let mut config = Config::default();
        config.xmpp_username = Some("user".into());
        assert_eq!(
            config.jid(),
            format!("user@nwws-oi.weather.gov/{}", DEFAULT_RESOURCE)
        );
        let muc = config.muc_jid();
        assert_eq!(muc.domain_str(), "conference.nwws-oi.weather.gov");
    }
}
