//! Administrative listing and follower-count configuration (§4.6).

use crate::error::ClusterError;
use crate::fail_fast;
use crate::node::{NodeInfo, NodeRole};
use crate::pf_info;

use super::ClusterManager;

impl ClusterManager {
    /// `this_node` first, then `leader_node` (follower/learner only), then
    /// every `other_node_map` entry — the `ADMIN SHOW NODES` ordering.
    pub async fn list_nodes(&self) -> Vec<NodeInfo> {
        let state = self.state.lock().await;
        let mut nodes = Vec::with_capacity(2 + state.other_node_map.len());
        if let Some(this) = &state.this_node {
            nodes.push(this.clone());
        }
        if let Some(leader) = &state.leader_node {
            nodes.push(leader.clone());
        }
        nodes.extend(state.other_node_map.values().cloned());
        nodes
    }

    /// Resolves `name` against `this_node`, `leader_node`, or
    /// `other_node_map`. Fatal if called before a member role is assigned —
    /// `Uninitialized`, `Admin`, and `Standalone` roles have no member view.
    pub async fn get_node_info_by_name(&self, name: &str) -> Option<NodeInfo> {
        let state = self.state.lock().await;
        match state.this_node.as_ref().map(|n| n.node_role) {
            Some(NodeRole::Leader) | Some(NodeRole::Follower) | Some(NodeRole::Learner) => {}
            other => fail_fast!("get_node_info_by_name called with no member view (role {:?})", other),
        }
        if let Some(this) = &state.this_node {
            if this.node_name == name {
                return Some(this.clone());
            }
        }
        if let Some(leader) = &state.leader_node {
            if leader.node_name == name {
                return Some(leader.clone());
            }
        }
        state.other_node_map.get(name).cloned()
    }

    pub async fn this_node(&self) -> Option<NodeInfo> {
        self.state.lock().await.this_node.clone()
    }

    /// Leader-only. Returns `NotSupport` if `count > 5` (invariant 5).
    pub async fn set_follower_number(&self, count: usize) -> Result<(), ClusterError> {
        if count > 5 {
            return Err(ClusterError::not_support(format!(
                "follower_count {count} exceeds the maximum of 5"
            )));
        }
        let mut state = self.state.lock().await;
        state.follower_count = count;
        pf_info!("follower count set to {}", count);
        Ok(())
    }

    pub async fn get_follower_number(&self) -> usize {
        self.state.lock().await.follower_count
    }
}
