use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Directory raw responses are archived to; unset disables archival.
    #[serde(default)]
    pub datastore: Option<PathBuf>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    pub address: String,
    pub port: u16,
    pub poll_path: String,
    pub timeout_ms: u64,
    pub interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            address: "192.168.1.254".to_string(),
            port: 80,
            poll_path: "nonAuth/wan_conn.xml".to_string(),
            timeout_ms: 1000,
            interval_secs: 10,
        }
    }
}

impl RouterConfig {
    /// URL of the status page; the port is left out when it is 80.
    pub fn poll_url(&self) -> String {
        let path = self.poll_path.trim_start_matches('/');
        if self.port == 80 {
            format!("http://{}/{}", self.address, path)
        } else {
            format!("http://{}:{}/{}", self.address, self.port, path)
        }
    }

    /// The hub refuses status requests without a matching `Referer`.
    pub fn referer(&self) -> String {
        format!("http://{}/", self.address)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen: String,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

impl Config {
    /// Loads the config at `path`, or the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?;
    Ok(config_dir.join("btsmarthub2-exporter").join("config.toml"))
}
