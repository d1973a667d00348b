//! TOML-deserializable configuration consumed by [`crate::manager::ClusterManager`].

use serde::{Deserialize, Serialize};

/// Controls whether `RegisterToLeader` ships the node's current WAL commit
/// timestamp, or `0` (asking for a full WAL replay) on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderInitPhase {
    Phase1,
    Phase2,
}

impl Default for ReaderInitPhase {
    fn default() -> Self {
        ReaderInitPhase::Phase1
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

/// Cluster-facing subset of the node's configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_peer_server_ip")]
    pub peer_server_ip: String,
    #[serde(default)]
    pub peer_server_port: u16,
    #[serde(default)]
    pub reader_init_phase: ReaderInitPhase,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub follower_count: usize,
}

fn default_peer_server_ip() -> String {
    "0.0.0.0".into()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            peer_server_ip: default_peer_server_ip(),
            peer_server_port: 0,
            reader_init_phase: ReaderInitPhase::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            follower_count: 0,
        }
    }
}

impl ClusterConfig {
    /// Parses a TOML configuration string, following the reference crate's
    /// `config_str: Option<&str>` convention: `None` yields all-default
    /// configuration.
    pub fn parse(config_str: Option<&str>) -> Result<Self, crate::error::ClusterError> {
        match config_str {
            None => Ok(ClusterConfig::default()),
            Some(s) => toml::from_str(s)
                .map_err(|e| crate::error::ClusterError::msg(format!("bad cluster config: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_absent() {
        let cfg = ClusterConfig::parse(None).unwrap();
        assert_eq!(cfg.heartbeat_interval_ms, 1000);
        assert_eq!(cfg.follower_count, 0);
        assert_eq!(cfg.reader_init_phase, ReaderInitPhase::Phase1);
    }

    #[test]
    fn overrides_parsed() {
        let cfg = ClusterConfig::parse(Some(
            "peer_server_ip = \"10.0.0.1\"\npeer_server_port = 6001\nheartbeat_interval_ms = 500\n",
        ))
        .unwrap();
        assert_eq!(cfg.peer_server_ip, "10.0.0.1");
        assert_eq!(cfg.peer_server_port, 6001);
        assert_eq!(cfg.heartbeat_interval_ms, 500);
    }
}
