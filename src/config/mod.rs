//! # Configuration
//!
//! A small TOML-backed configuration file for the hosting process: where to
//! find scripts by default, the agent name handed to the `CommRelay`, and
//! the default central host:port to connect to. The Scheduling & Response
//! Core itself takes no configuration beyond the scripts it is handed —
//! everything here governs the binary, not `sim::*`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Agent name passed to the `CommRelay`.
    pub name: String,
    /// Default `host:port` for the reference `LineRelay` transport, used
    /// when `-central` is not given on the command line.
    pub central: String,
    /// Directory scripts are resolved against when a positional script
    /// argument is not already an absolute/relative path that exists.
    #[serde(default = "default_script_dir")]
    pub script_dir: String,
}

fn default_script_dir() -> String {
    "scripts".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            simulator: SimulatorConfig {
                name: "simjector".to_string(),
                central: "127.0.0.1:9000".to_string(),
                script_dir: default_script_dir(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}
