//! In-memory description of a single cluster member (C1).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Role of a node within the cluster. The leader is externally designated;
/// this crate never runs an election to pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Uninitialized,
    Admin,
    Standalone,
    Leader,
    Follower,
    Learner,
}

/// Liveness/membership status of a node as observed by its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Invalid,
    Alive,
    Timeout,
    LostConnection,
    Removed,
}

/// Operation requested of [`crate::manager::ClusterManager::update_node_by_leader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateNodeOp {
    Remove,
    LostConnection,
}

/// Default heartbeat interval published to joiners when the leader's own
/// configuration does not override it.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Plain data describing one cluster member. Owned exclusively by its
/// holder (a [`crate::manager::ClusterManager`] map slot, `this_node`, or
/// `leader_node`); mutated only while that holder's mutex is locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_name: String,
    pub node_role: NodeRole,
    pub node_status: NodeStatus,
    pub ip_address: String,
    pub port: u16,
    pub txn_timestamp: u64,
    pub last_update_ts: u64,
    pub heartbeat_count: u64,
    pub heartbeat_interval_ms: u64,
    pub leader_term: i64,
}

impl NodeInfo {
    pub fn new(node_name: impl Into<String>, node_role: NodeRole, ip_address: impl Into<String>, port: u16) -> Self {
        NodeInfo {
            node_name: node_name.into(),
            node_role,
            node_status: NodeStatus::Invalid,
            ip_address: ip_address.into(),
            port,
            txn_timestamp: 0,
            last_update_ts: 0,
            heartbeat_count: 0,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            leader_term: 0,
        }
    }

    /// Stamps `last_update_ts` to the current wall-clock second. Invariant 4
    /// (non-decreasing) holds because real time never goes backwards within
    /// a process's lifetime.
    pub fn touch_now(&mut self) {
        self.last_update_ts = now_secs();
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.node_name == other.node_name
    }
}
impl Eq for NodeInfo {}

/// Wall-clock seconds since epoch, matching the original's
/// `std::chrono::system_clock::now()` sampling.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_name_only() {
        let mut a = NodeInfo::new("n1", NodeRole::Follower, "10.0.0.1", 1);
        let b = NodeInfo::new("n1", NodeRole::Learner, "10.0.0.2", 2);
        assert_eq!(a, b);
        a.node_name = "n2".into();
        assert_ne!(a, b);
    }

    #[test]
    fn touch_now_is_monotone_in_process() {
        let mut n = NodeInfo::new("n1", NodeRole::Follower, "10.0.0.1", 1);
        n.touch_now();
        let first = n.last_update_ts;
        n.touch_now();
        assert!(n.last_update_ts >= first);
    }
}
