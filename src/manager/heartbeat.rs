//! Heartbeat protocols: the follower/learner periodic ping and the leader's
//! timeout sweep (§4.4.5), leader-side ingest (§4.4.6), and follower/learner
//! gossip reconciliation (§4.4.7).

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClusterError;
use crate::node::{now_secs, NodeInfo, NodeRole, NodeStatus};
use crate::tasks::{new_task, GossipNodeInfo, HeartBeatReply, HeartBeatRequest, TaskReply, TaskRequest, WireNodeType};
use crate::{fail_fast, pf_debug, pf_info, pf_warn};

use super::{ClusterManager, ManagerState};

impl ManagerState {
    /// Follower/learner-only: reconciles `other_node_map` against the
    /// leader's gossiped view, inserting/updating every named entry and
    /// erasing anything not mentioned this round.
    pub(super) fn update_node_info_no_lock(&mut self, nodes: Vec<GossipNodeInfo>) {
        let seen: HashSet<String> = nodes.iter().map(|n| n.node_name.clone()).collect();
        for gossip in nodes {
            let entry = self.other_node_map.entry(gossip.node_name.clone()).or_insert_with(|| {
                NodeInfo::new(
                    gossip.node_name.clone(),
                    gossip.node_type.to_node_role(),
                    gossip.node_ip.clone(),
                    gossip.node_port,
                )
            });
            entry.node_role = gossip.node_type.to_node_role();
            entry.node_status = gossip.node_status;
            entry.ip_address = gossip.node_ip;
            entry.port = gossip.node_port;
            entry.txn_timestamp = gossip.txn_timestamp;
            entry.heartbeat_count = gossip.hb_count;
            entry.touch_now();
        }
        self.other_node_map.retain(|name, _| seen.contains(name));
    }
}

impl ClusterManager {
    /// Leader-only: spawns the periodic timeout sweep. Called once from
    /// `init_as_leader`; `hb_thread` going from `None` to `Some` is the
    /// single-spawn guard (SPEC_FULL.md §9, decision #3).
    pub(super) fn spawn_heartbeat_sweep(self: &Arc<Self>) {
        self.hb_running.store(true, Ordering::SeqCst);
        let mgr = Arc::clone(self);
        let handle = tokio::spawn(async move { mgr.check_heartbeat_loop().await });
        *self.hb_thread.lock().unwrap() = Some(handle);
    }

    async fn check_heartbeat_loop(self: Arc<Self>) {
        loop {
            let interval_ms = {
                let state = self.state.lock().await;
                match &state.this_node {
                    Some(n) => n.heartbeat_interval_ms,
                    None => return,
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                _ = self.hb_notify.notified() => {}
            }
            if !self.hb_running.load(Ordering::SeqCst) {
                return;
            }
            self.check_heartbeat_inner().await;
        }
    }

    /// Leader-only: transitions any `Alive` peer whose `last_update_ts` is
    /// older than `2 * heartbeat_interval_ms` to `Timeout`.
    async fn check_heartbeat_inner(&self) {
        let mut state = self.state.lock().await;
        state.require_role(NodeRole::Leader);
        let interval_ms = state.this_node.as_ref().expect("leader initialized").heartbeat_interval_ms;
        let threshold_secs = (2 * interval_ms) / 1000;
        let now = now_secs();
        for node in state.other_node_map.values_mut() {
            if node.node_status == NodeStatus::Alive && node.last_update_ts + threshold_secs < now {
                pf_info!("node {} timed out", node.node_name);
                node.node_status = NodeStatus::Timeout;
            }
        }
    }

    /// Follower/learner entry point, spawned once by `register_to_leader`.
    pub(super) async fn heartbeat_to_leader_loop(self: Arc<Self>) {
        loop {
            let interval_ms = {
                let state = self.state.lock().await;
                match &state.leader_node {
                    Some(l) => l.heartbeat_interval_ms,
                    None => return,
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                _ = self.hb_notify.notified() => {}
            }
            if !self.hb_running.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = self.heartbeat_to_leader_once().await {
                pf_warn!("heartbeat to leader failed: {}", e);
            }
        }
    }

    async fn heartbeat_to_leader_once(&self) -> Result<(), ClusterError> {
        let client = {
            let state = self.state.lock().await;
            state.client_to_leader.clone().expect("client_to_leader set by init_as_reader")
        };

        if !client.server_connected() {
            if let Err(e) = client.reconnect().await {
                pf_warn!("reconnect to leader failed: {}", e);
                self.state.lock().await.this_node_mut().touch_now();
                return Ok(());
            }
        }

        let (node_name, node_type, ip, port) = {
            let mut state = self.state.lock().await;
            state.this_node_mut().touch_now();
            let this = state.this_node.as_ref().expect("this_node initialized");
            let node_type = match WireNodeType::from_node_role(this.node_role) {
                Some(t) => t,
                None => fail_fast!("heartbeat from unsupported role {:?}", this.node_role),
            };
            (this.node_name.clone(), node_type, this.ip_address.clone(), this.port)
        };
        let txn_timestamp = self.env.wal.current_commit_ts().await;

        let (task, wait) = new_task(TaskRequest::HeartBeat(HeartBeatRequest {
            node_name,
            node_type,
            node_ip: ip,
            node_port: port,
            txn_timestamp,
        }));
        client.send(task)?;
        match wait.wait().await {
            Err(e) => {
                self.state.lock().await.leader_node_mut().node_status = NodeStatus::Timeout;
                Err(e)
            }
            Ok(TaskReply::HeartBeat(reply)) => {
                self.apply_heartbeat_reply(reply).await;
                Ok(())
            }
            Ok(_) => Err(ClusterError::unexpected("unexpected reply type for HeartBeat task")),
        }
    }

    async fn apply_heartbeat_reply(&self, reply: HeartBeatReply) {
        let mut state = self.state.lock().await;
        {
            let leader = state.leader_node_mut();
            leader.node_status = NodeStatus::Alive;
            leader.touch_now();
            leader.leader_term = reply.leader_term;
        }
        state.this_node_mut().heartbeat_count += 1;
        state.update_node_info_no_lock(reply.other_nodes);
        if let Some(status) = reply.sender_status {
            state.this_node_mut().node_status = status;
        }
    }

    /// Leader-only: the inbound `HeartBeat` handler's ingest logic (§4.4.6).
    /// Unknown senders are rejected with `NotExistNode` rather than
    /// auto-admitted by gossip (SPEC_FULL.md §9, decision #2).
    pub async fn update_node_info_by_heartbeat(
        &self,
        sender_name: &str,
        sender_ip: &str,
        sender_port: u16,
        sender_txn_ts: u64,
    ) -> Result<HeartBeatReply, ClusterError> {
        let mut state = self.state.lock().await;
        state.require_role(NodeRole::Leader);

        let sender_status = match state.other_node_map.get_mut(sender_name) {
            None => return Err(ClusterError::not_exist_node(sender_name)),
            Some(node) => {
                if node.ip_address != sender_ip || node.port != sender_port {
                    return Err(ClusterError::node_info_updated(sender_name));
                }
                match node.node_status {
                    NodeStatus::Alive | NodeStatus::Timeout => {
                        node.txn_timestamp = sender_txn_ts;
                        node.touch_now();
                        node.heartbeat_count += 1;
                        node.node_status = NodeStatus::Alive;
                        NodeStatus::Alive
                    }
                    NodeStatus::Removed => NodeStatus::Removed,
                    NodeStatus::LostConnection => {
                        pf_debug!("heartbeat from lost-connection node {}", sender_name);
                        NodeStatus::LostConnection
                    }
                    NodeStatus::Invalid => fail_fast!("node {} has invalid status", sender_name),
                }
            }
        };

        let leader_term = state.this_node.as_ref().expect("leader initialized").leader_term;
        let mut other_nodes = Vec::new();
        for (name, node) in state.other_node_map.iter() {
            if name == sender_name {
                continue;
            }
            match node.node_status {
                NodeStatus::Alive | NodeStatus::Timeout => {
                    let node_type = WireNodeType::from_node_role(node.node_role)
                        .unwrap_or_else(|| fail_fast!("gossiped node {} has non-reader role {:?}", name, node.node_role));
                    other_nodes.push(GossipNodeInfo {
                        node_name: node.node_name.clone(),
                        node_ip: node.ip_address.clone(),
                        node_port: node.port,
                        node_type,
                        node_status: node.node_status,
                        txn_timestamp: node.txn_timestamp,
                        hb_count: node.heartbeat_count,
                    });
                }
                other => fail_fast!("node {} has non-projectable status {:?} in other_node_map", name, other),
            }
        }

        Ok(HeartBeatReply {
            other_nodes,
            leader_term,
            sender_status: Some(sender_status),
            error_code: 0,
            error_message: String::new(),
        })
    }
}
