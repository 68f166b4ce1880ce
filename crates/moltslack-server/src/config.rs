use anyhow::Context;
use libmoltslack::EngineConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Origins allowed for cross-origin browser requests. `*` allows any.
    pub allow_origins: Vec<String>,
    pub summary_timeout_secs: u64,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load from `path`, or the default config path if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("invalid config {}", config_path.display()))
        } else if path.is_some() {
            anyhow::bail!("config file not found: {}", config_path.display())
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn config_path() -> PathBuf {
        moltslack_protocol::paths::config_path()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            allow_origins: Vec::new(),
            summary_timeout_secs: 90,
            engine: EngineConfig::default(),
        }
    }
}
