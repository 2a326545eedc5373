//! blockwatch.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PREFIX: &str = "openstack";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9180";
pub const DEFAULT_SCRAPE_TIMEOUT: &str = "30s";
/// Longest accepted scrape timeout.
pub const MAX_SCRAPE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Errors raised when a parsed configuration is not usable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid metric prefix: {0:?}")]
    Prefix(String),

    #[error("invalid listen address {0:?}: {1}")]
    Listen(String, std::net::AddrParseError),

    #[error("invalid scrape timeout: {0:?}")]
    ScrapeTimeout(String),

    #[error("missing required field: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockwatchConfig {
    #[serde(default)]
    pub exporter: ExporterConfig,
    pub cloud: CloudConfig,
    /// Connection options per logical service name ("cinder", "identity", ...).
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout: String,
    /// Metric names to suppress, bare (`agent_state`) or service-qualified
    /// (`cinder-agent_state`).
    #[serde(default)]
    pub disabled_metrics: Vec<String>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            listen: default_listen(),
            scrape_timeout: default_scrape_timeout(),
            disabled_metrics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub auth_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default = "default_domain")]
    pub user_domain_name: String,
    #[serde(default = "default_domain")]
    pub project_domain_name: String,
    pub region: Option<String>,
    #[serde(default)]
    pub interface: Interface,
}

/// Endpoint interface as listed in the service catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    #[default]
    Public,
    Internal,
    Admin,
}

impl Interface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Public => "public",
            Interface::Internal => "internal",
            Interface::Admin => "admin",
        }
    }
}

/// How to reach one service. Unset fields inherit from `[cloud]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointOptions {
    pub region: Option<String>,
    pub interface: Option<Interface>,
    /// Explicit endpoint URL, bypassing the service catalog.
    pub url: Option<String>,
}

impl BlockwatchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BlockwatchConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the fields that `serde` cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.exporter.prefix;
        if prefix.is_empty()
            || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Prefix(prefix.clone()));
        }
        self.exporter.listen_addr()?;
        self.exporter.scrape_timeout()?;
        if self.cloud.auth_url.trim().is_empty() {
            return Err(ConfigError::Missing("cloud.auth_url"));
        }
        if self.cloud.username.trim().is_empty() {
            return Err(ConfigError::Missing("cloud.username"));
        }
        Ok(())
    }
}

impl ExporterConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|e| ConfigError::Listen(self.listen.clone(), e))
    }

    pub fn scrape_timeout(&self) -> Result<Duration, ConfigError> {
        match parse_duration(&self.scrape_timeout) {
            Some(d) if !d.is_zero() && d <= MAX_SCRAPE_TIMEOUT => Ok(d),
            _ => Err(ConfigError::ScrapeTimeout(self.scrape_timeout.clone())),
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_scrape_timeout() -> String {
    DEFAULT_SCRAPE_TIMEOUT.to_string()
}

fn default_domain() -> String {
    "Default".to_string()
}
