//! Leader-side admission (§4.4.2) and follower/learner-side registration
//! (§4.4.3, §4.4.4).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::ReaderInitPhase;
use crate::error::ClusterError;
use crate::node::{NodeInfo, NodeRole, NodeStatus, DEFAULT_HEARTBEAT_INTERVAL_MS};
use crate::tasks::{new_task, RegisterRequest, TaskReply, TaskRequest, UnregisterRequest, WireNodeType};
use crate::{fail_fast, pf_error, pf_info, pf_trace};

use super::ClusterManager;

impl ClusterManager {
    /// Admits a follower/learner into the cluster. Leader-only.
    ///
    /// Dials the joiner and ships the WAL diff before touching membership,
    /// so a failed dial or a failed sync never leaves a half-admitted node
    /// behind.
    pub async fn add_node_info(&self, mut node_info: NodeInfo) -> Result<(), ClusterError> {
        {
            let state = self.state.lock().await;
            state.require_role(NodeRole::Leader);
            if state.other_node_map.contains_key(&node_info.node_name) {
                return Err(ClusterError::duplicate_node(node_info.node_name));
            }
        }

        let client = self.env.dialer.dial(&node_info.ip_address, node_info.port);
        client.init().await?;

        if let Err(e) = self.sync_logs_on_registration(&node_info, &client).await {
            client.uninit(false).await;
            return Err(e);
        }

        let mut state = self.state.lock().await;
        state.require_role(NodeRole::Leader);
        if state.other_node_map.contains_key(&node_info.node_name) {
            drop(state);
            // A second `Register` for the same name raced us while we held
            // no lock during the dial/sync above. The freshly synced client
            // is discarded rather than accepted as a silent duplicate
            // (SPEC_FULL.md §9, decision #1).
            client.uninit(false).await;
            return Err(ClusterError::duplicate_node(node_info.node_name));
        }

        node_info.node_status = NodeStatus::Alive;
        pf_info!("node {} registered as {:?}", node_info.node_name, node_info.node_role);
        state.reader_client_map.insert(node_info.node_name.clone(), client);
        state.other_node_map.insert(node_info.node_name.clone(), node_info);
        Ok(())
    }

    /// Leader-only: the WAL diff a joiner needs, shipped as a single
    /// synchronous `SyncLog` batch (§4.4.4).
    pub(super) async fn sync_logs_on_registration(
        &self,
        node: &NodeInfo,
        client: &Arc<dyn crate::peer::PeerClient>,
    ) -> Result<(), ClusterError> {
        pf_trace!("leader will get the log diff for {}", node.node_name);
        let entries = self.env.wal.get_diff_wal_entries_since(node.txn_timestamp).await;
        pf_trace!(
            "leader will send {} diff logs to {} synchronously",
            entries.len(),
            node.node_name
        );
        self.send_logs(&node.node_name, client, entries, true, true).await
    }

    /// Follower/learner entry point: registers with the leader, then spawns
    /// the periodic heartbeat task. The heartbeat task is spawned exactly
    /// once per `ClusterManager`, guarded by `hb_thread` going from `None`
    /// to `Some` (SPEC_FULL.md §9, decision #3).
    pub async fn register_to_leader(self: &Arc<Self>) -> Result<(), ClusterError> {
        self.register_to_leader_no_lock().await?;

        self.hb_running.store(true, Ordering::SeqCst);
        let mgr = Arc::clone(self);
        let handle = tokio::spawn(async move { mgr.heartbeat_to_leader_loop().await });
        *self.hb_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn register_to_leader_no_lock(&self) -> Result<(), ClusterError> {
        let (node_name, role, ip, port) = {
            let state = self.state.lock().await;
            let this = state.this_node.as_ref().expect("this_node initialized before registering");
            (this.node_name.clone(), this.node_role, this.ip_address.clone(), this.port)
        };
        let wire_role = match role {
            NodeRole::Follower => WireNodeType::Follower,
            NodeRole::Learner => WireNodeType::Learner,
            other => fail_fast!("register_to_leader called with unsupported role {:?}", other),
        };
        let txn_timestamp = match self.env.wal.reader_init_phase() {
            ReaderInitPhase::Phase2 => self.env.wal.current_commit_ts().await,
            ReaderInitPhase::Phase1 => 0,
        };

        let client = {
            let state = self.state.lock().await;
            state.client_to_leader.clone().expect("client_to_leader set by init_as_reader")
        };
        let (task, wait) = new_task(TaskRequest::Register(RegisterRequest {
            node_name,
            node_type: wire_role,
            node_ip: ip,
            node_port: port,
            txn_timestamp,
        }));
        client.send(task)?;
        let reply = wait.wait().await?;
        let register_reply = match reply {
            TaskReply::Register(r) => r,
            _ => return Err(ClusterError::unexpected("unexpected reply type for Register task")),
        };

        let mut state = self.state.lock().await;
        let leader = state.leader_node_mut();
        leader.node_name = register_reply.leader_name;
        leader.node_status = NodeStatus::Alive;
        leader.touch_now();
        leader.leader_term = register_reply.leader_term;
        leader.heartbeat_interval_ms = if register_reply.heart_beat_interval == 0 {
            DEFAULT_HEARTBEAT_INTERVAL_MS
        } else {
            register_reply.heart_beat_interval
        };
        pf_info!(
            "registered with leader {}, heartbeat interval {} ms",
            leader.node_name,
            leader.heartbeat_interval_ms
        );
        Ok(())
    }

    pub(super) async fn unregister_to_leader_no_lock(&self) -> Result<(), ClusterError> {
        let (role, leader_alive, node_name, client) = {
            let state = self.state.lock().await;
            let role = state.this_node.as_ref().map(|n| n.node_role);
            let leader_alive = state
                .leader_node
                .as_ref()
                .map(|l| l.node_status == NodeStatus::Alive)
                .unwrap_or(false);
            let node_name = state.this_node.as_ref().map(|n| n.node_name.clone());
            let client = state.client_to_leader.clone();
            (role, leader_alive, node_name, client)
        };

        if matches!(role, Some(NodeRole::Follower) | Some(NodeRole::Learner)) && leader_alive {
            if let (Some(node_name), Some(client)) = (node_name, client) {
                let (task, wait) = new_task(TaskRequest::Unregister(UnregisterRequest { node_name }));
                client.send(task)?;
                if let Err(e) = wait.wait().await {
                    pf_error!("failed to unregister from leader: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
