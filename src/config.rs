//! WolfPaxos Configuration
//!
//! This module provides configuration structures for a WolfPaxos node.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::paxos::ElectionConfig;

/// Main WolfPaxos configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfPaxosConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (also the owner id of this node's ballots)
    pub id: String,

    /// Address to bind for cluster communication
    pub bind_address: String,

    /// Data directory for durable acceptor state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Advertised address for other nodes to connect
    #[serde(default)]
    pub advertise_address: Option<String>,
}

/// A cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Member node id
    pub id: String,

    /// Member address (host:port)
    pub address: String,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster members. This node may be listed too; it is skipped.
    #[serde(default)]
    pub members: Vec<MemberConfig>,

    /// Leader pulse interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Leader silence in milliseconds before it is presumed dead
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Quiet period after the last prepare before an election may start
    #[serde(default = "default_liveness_window_ms")]
    pub liveness_window_ms: u64,

    /// Liveness poll interval in milliseconds
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_ms: u64,

    /// Maximum random delay added to each liveness poll (randomized)
    #[serde(default = "default_liveness_jitter_ms")]
    pub liveness_jitter_ms: u64,

    /// Quorum size (0 = majority of all members including this node)
    #[serde(default)]
    pub min_quorum: usize,

    /// Node that starts out as leader without an election
    #[serde(default)]
    pub leader: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_heartbeat_timeout_ms() -> u64 {
    1500
}

fn default_liveness_window_ms() -> u64 {
    2000
}

fn default_liveness_poll_ms() -> u64 {
    250
}

fn default_liveness_jitter_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfpaxos")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfPaxosConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfPaxosConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        let mut seen = HashSet::new();
        for member in &self.cluster.members {
            if member.id.is_empty() || member.address.is_empty() {
                return Err(crate::Error::Config(
                    "cluster.members entries need an id and an address".into(),
                ));
            }
            if !seen.insert(member.id.as_str()) {
                return Err(crate::Error::Config(format!(
                    "duplicate cluster member: {}",
                    member.id
                )));
            }
        }

        if self.quorum_size() > self.cluster_size() {
            return Err(crate::Error::Config(format!(
                "quorum of {} cannot be met by {} nodes",
                self.quorum_size(),
                self.cluster_size()
            )));
        }

        // Two disjoint minorities could each resolve a different value
        if self.cluster.min_quorum != 0 && self.cluster.min_quorum <= self.cluster_size() / 2 {
            return Err(crate::Error::Config(format!(
                "cluster.min_quorum of {} is not a majority of {} nodes",
                self.cluster.min_quorum,
                self.cluster_size()
            )));
        }

        if self.cluster.heartbeat_timeout_ms <= self.cluster.heartbeat_interval_ms {
            return Err(crate::Error::Config(
                "cluster.heartbeat_timeout_ms must exceed cluster.heartbeat_interval_ms".into(),
            ));
        }

        if self.cluster.liveness_poll_ms == 0 {
            return Err(crate::Error::Config("cluster.liveness_poll_ms cannot be 0".into()));
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Members other than this node
    pub fn peers(&self) -> impl Iterator<Item = &MemberConfig> {
        self.cluster
            .members
            .iter()
            .filter(move |m| m.id != self.node.id)
    }

    /// Total number of nodes including this one
    pub fn cluster_size(&self) -> usize {
        self.peers().count() + 1
    }

    /// Calculate quorum size
    pub fn quorum_size(&self) -> usize {
        if self.cluster.min_quorum > 0 {
            self.cluster.min_quorum
        } else {
            (self.cluster_size() / 2) + 1
        }
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.heartbeat_interval_ms)
    }

    /// Get liveness poll interval as Duration
    pub fn liveness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.liveness_poll_ms)
    }

    /// Timing policy handed to the Paxos node
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig {
            heartbeat_period: self.heartbeat_interval(),
            heartbeat_timeout: Duration::from_millis(self.cluster.heartbeat_timeout_ms),
            liveness_window: Duration::from_millis(self.cluster.liveness_window_ms),
        }
    }
}
