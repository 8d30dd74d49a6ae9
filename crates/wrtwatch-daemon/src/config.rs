//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use wrtwatch_collect::{RouterSource, SourceTransport, SshRunner, UbusClient};
use wrtwatch_core::ResolutionMode;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            store: StoreConfig::default(),
            tracker: TrackerConfig::default(),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Polling cycle interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// TLS configuration (optional - enables HTTPS when present)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            poll_interval_secs: default_poll_interval(),
            tls: None,
        }
    }
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM format)
    pub cert: String,
    /// Path to private key file (PEM format)
    pub key: String,
}

fn default_bind() -> String {
    "0.0.0.0:8380".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the identity store file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./wrtwatch-store.json")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// How unknown MACs are resolved: "opportunistic" or "curated"
    #[serde(default)]
    pub mode: ResolutionMode,
}

/// One router to poll
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Ssh {
        name: String,
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        #[serde(default = "default_username")]
        username: String,
        #[serde(default)]
        identity_file: Option<PathBuf>,
    },
    Ubus {
        name: String,
        /// Router root URL, e.g. `http://192.168.1.1`
        url: String,
        #[serde(default = "default_username")]
        username: String,
        password: String,
    },
}

fn default_ssh_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".to_string()
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Ssh { name, .. } | Self::Ubus { name, .. } => name,
        }
    }

    /// Build the collector for this source.
    pub fn to_source(&self) -> RouterSource {
        match self {
            Self::Ssh {
                name,
                host,
                port,
                username,
                identity_file,
            } => {
                let mut runner = SshRunner::new(host.clone(), username.clone());
                runner.port = *port;
                runner.identity_file = identity_file.clone();
                RouterSource::new(name.clone(), SourceTransport::Ssh(runner))
            }
            Self::Ubus {
                name,
                url,
                username,
                password,
            } => {
                let client = UbusClient::new(url.clone(), username.clone(), password.clone());
                RouterSource::new(name.clone(), SourceTransport::Ubus(client))
            }
        }
    }
}

impl Config {
    /// A copy safe to expose over the API: credentials blanked out.
    pub fn redacted(&self) -> Config {
        let mut config = self.clone();
        for source in &mut config.sources {
            if let SourceConfig::Ubus { password, .. } = source {
                *password = "<redacted>".to_string();
            }
        }
        config
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
