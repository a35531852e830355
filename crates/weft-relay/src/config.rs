//! Relay configuration file management.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Agents allowed to call the admin endpoints.
    #[serde(default)]
    pub admin_agents: Vec<String>,
    /// Log filter, e.g. "info" or "weft_relay=debug".
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            db_path: default_db_path(),
            admin_agents: Vec::new(),
            log_filter: default_log_filter(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:7300".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("weft-relay.db")
}

fn default_log_filter() -> String {
    "info".to_string()
}
