//! Administrative node removal (§4.4.9).

use crate::error::ClusterError;
use crate::node::{NodeRole, NodeStatus, UpdateNodeOp};
use crate::pf_info;
use crate::tasks::{new_task, ChangeRoleRequest, TaskRequest};

use super::ClusterManager;

impl ClusterManager {
    /// Leader-only. Rejects self-removal. Transitions the target to
    /// `Removed`, asks it to demote to admin, then erases it from
    /// membership once the RPC has been attempted.
    pub async fn remove_node_info(&self, name: &str) -> Result<(), ClusterError> {
        let client = {
            let mut state = self.state.lock().await;
            state.require_role(NodeRole::Leader);
            if state.this_node.as_ref().map(|n| n.node_name.as_str()) == Some(name) {
                return Err(ClusterError::not_support("cannot remove the local node"));
            }
            match state.other_node_map.get_mut(name) {
                Some(node) => node.node_status = NodeStatus::Removed,
                None => return Err(ClusterError::not_exist_node(name)),
            }
            state.reader_client_map.remove(name)
        };

        if let Some(client) = &client {
            let (task, wait) = new_task(TaskRequest::ChangeRole(ChangeRoleRequest {
                node_name: name.to_string(),
                target_role: "admin".to_string(),
            }));
            client.send(task)?;
            if let Err(e) = wait.wait().await {
                pf_info!("remove {}: role-change RPC failed, removing anyway: {}", name, e);
            }
        }

        let mut state = self.state.lock().await;
        state.other_node_map.remove(name);
        pf_info!("node {} removed", name);
        Ok(())
    }

    /// Leader-only. `Remove` erases the node from both maps and closes its
    /// client gracefully; `LostConnection` keeps the membership record but
    /// drops the `PeerClient` ungracefully and out of `reader_client_map`.
    pub async fn update_node_by_leader(&self, name: &str, op: UpdateNodeOp) -> Result<(), ClusterError> {
        let client = {
            let mut state = self.state.lock().await;
            state.require_role(NodeRole::Leader);
            match op {
                UpdateNodeOp::Remove => {
                    if !state.other_node_map.contains_key(name) {
                        return Err(ClusterError::not_exist_node(name));
                    }
                    state.other_node_map.remove(name);
                    state.reader_client_map.remove(name)
                }
                UpdateNodeOp::LostConnection => match state.other_node_map.get_mut(name) {
                    Some(node) => {
                        node.node_status = NodeStatus::LostConnection;
                        state.reader_client_map.remove(name)
                    }
                    None => return Err(ClusterError::not_exist_node(name)),
                },
            }
        };

        if let Some(client) = client {
            match op {
                UpdateNodeOp::Remove => client.uninit(true).await,
                UpdateNodeOp::LostConnection => client.uninit(false).await,
            }
        }
        pf_info!("node {} updated by leader: {:?}", name, op);
        Ok(())
    }
}
