//! Service configuration, read from a TOML file

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tapline_external_media::{AriNodeConfig, DEFAULT_FORMAT, DEFAULT_STASIS_APP};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub switch: SwitchConfig,
    pub logging: LoggingSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Where the switch dials in with AudioSocket connections
    pub audiosocket_listen: SocketAddr,
    /// Address handed to the switch as the external host. Defaults to
    /// `audiosocket_listen`.
    pub audiosocket_advertise: Option<String>,
    /// WebSocket listener for media consumers
    pub client_listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            audiosocket_listen: SocketAddr::from(([0, 0, 0, 0], 9092)),
            audiosocket_advertise: None,
            client_listen: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

impl ServerConfig {
    pub fn advertised_audiosocket(&self) -> String {
        self.audiosocket_advertise
            .clone()
            .unwrap_or_else(|| self.audiosocket_listen.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub default_format: String,
    pub stasis_app: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            default_format: DEFAULT_FORMAT.to_string(),
            stasis_app: DEFAULT_STASIS_APP.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub nodes: Vec<AriNodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}
