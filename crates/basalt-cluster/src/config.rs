//! Per-node configuration written as `node.toml` into each working
//! directory and read back by the launched process.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Config filename inside every node working directory.
pub const NODE_CONFIG_FILENAME: &str = "node.toml";

/// Role of a launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Holds cluster metadata/authority; one or more for HA.
    Master,

    /// Holds data, registers with every master.
    Worker,

    /// Member of the quorum service used for master leader election.
    Coordinator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Master => "master",
            Role::Worker => "worker",
            Role::Coordinator => "coordinator",
        };
        write!(f, "{s}")
    }
}

/// Configuration handed to a single node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Role of this process.
    pub role: Role,

    /// Ordinal within its role tier (0-indexed).
    pub ordinal: usize,

    /// Address to bind to.
    pub bind_address: String,

    /// Primary service port (RPC).
    pub service_port: u16,

    /// Secondary port (web/debug for masters, data for workers, peer for
    /// coordinators).
    pub aux_port: u16,

    /// Master RPC addresses. Workers register against these; masters see
    /// the full peer list.
    pub masters: Vec<String>,

    /// Coordination-ensemble connection string, when leader election is
    /// enabled.
    pub coordination: Option<String>,

    /// Whether masters should elect a leader instead of acting as a sole
    /// authority.
    pub election_enabled: bool,

    /// Arbitrary property overrides from the cluster spec.
    pub properties: BTreeMap<String, String>,
}

impl NodeConfig {
    /// Service address as `host:port`.
    pub fn service_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.service_port)
    }

    /// Writes the config as `node.toml` into `dir` and returns its path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(NODE_CONFIG_FILENAME);
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Loads a config previously written by [`NodeConfig::write_to`].
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(std::io::Error::other)
    }

    /// Looks up a property override, falling back to `default`.
    pub fn property_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.properties.get(key).map_or(default, String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> NodeConfig {
        NodeConfig {
            role: Role::Worker,
            ordinal: 1,
            bind_address: "127.0.0.1".to_string(),
            service_port: 7100,
            aux_port: 7101,
            masters: vec!["127.0.0.1:7000".to_string()],
            coordination: Some("127.0.0.1:7200,127.0.0.1:7201".to_string()),
            election_enabled: true,
            properties: BTreeMap::from([(
                "worker.register.delay.ms".to_string(),
                "500".to_string(),
            )]),
        }
    }

    #[test]
    fn write_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let config = sample();
        let path = config.write_to(temp.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), NODE_CONFIG_FILENAME);

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.role, Role::Worker);
        assert_eq!(loaded.ordinal, 1);
        assert_eq!(loaded.service_port, 7100);
        assert_eq!(loaded.masters, config.masters);
        assert_eq!(loaded.coordination, config.coordination);
        assert!(loaded.election_enabled);
    }

    #[test]
    fn property_lookup_with_default() {
        let config = sample();
        assert_eq!(config.property_or("worker.register.delay.ms", "250"), "500");
        assert_eq!(config.property_or("missing.key", "250"), "250");
    }

    #[test]
    fn role_display_matches_directory_naming() {
        assert_eq!(Role::Master.to_string(), "master");
        assert_eq!(Role::Worker.to_string(), "worker");
        assert_eq!(Role::Coordinator.to_string(), "coordinator");
    }
}
