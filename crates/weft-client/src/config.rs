//! Client configuration file management.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration for one agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// This agent's registered name.
    pub name: String,
    /// Base URL of the relay.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Directory for cache files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Community partition for the contact cache.
    #[serde(default = "default_community")]
    pub community: String,
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::ClientError::Cache(format!("read config: {e}")))?;
        toml::from_str(&raw).map_err(|e| crate::ClientError::Serialization(e.to_string()))
    }
}

fn default_relay_url() -> String {
    "http://127.0.0.1:7300".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".weft")
}

fn default_community() -> String {
    "default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AgentConfig = toml::from_str("name = \"atlas\"\n").expect("parse");
        assert_eq!(config.name, "atlas");
        assert_eq!(config.relay_url, "http://127.0.0.1:7300");
        assert_eq!(config.community, "default");
    }
}
