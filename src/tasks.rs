//! Typed request/response carriers exchanged with a remote node (C3), and
//! the RPC wire surface (§6) — the two share one set of field-stable
//! structs in this crate, since a task's request/reply *is* the message
//! that crosses the wire.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::ClusterError;
use crate::node::{NodeRole, NodeStatus};

/// Wire-level node type, as carried by `Register` and `HeartBeat` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireNodeType {
    Leader,
    Follower,
    Learner,
}

impl WireNodeType {
    pub fn to_node_role(self) -> NodeRole {
        match self {
            WireNodeType::Leader => NodeRole::Leader,
            WireNodeType::Follower => NodeRole::Follower,
            WireNodeType::Learner => NodeRole::Learner,
        }
    }

    /// `None` for roles that never cross the wire as a reader/leader type.
    pub fn from_node_role(role: NodeRole) -> Option<Self> {
        match role {
            NodeRole::Leader => Some(WireNodeType::Leader),
            NodeRole::Follower => Some(WireNodeType::Follower),
            NodeRole::Learner => Some(WireNodeType::Learner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_name: String,
    pub node_type: WireNodeType,
    pub node_ip: String,
    pub node_port: u16,
    pub txn_timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterReply {
    pub leader_name: String,
    pub leader_term: i64,
    pub heart_beat_interval: u64,
    pub error_code: i64,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub node_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnregisterReply {
    pub error_code: i64,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartBeatRequest {
    pub node_name: String,
    pub node_type: WireNodeType,
    pub node_ip: String,
    pub node_port: u16,
    pub txn_timestamp: u64,
}

/// One peer's projection as gossiped inside a `HeartBeat` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipNodeInfo {
    pub node_name: String,
    pub node_ip: String,
    pub node_port: u16,
    pub node_type: WireNodeType,
    pub node_status: NodeStatus,
    pub txn_timestamp: u64,
    pub hb_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartBeatReply {
    pub other_nodes: Vec<GossipNodeInfo>,
    pub leader_term: i64,
    pub sender_status: Option<NodeStatus>,
    pub error_code: i64,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogRequest {
    pub log_entries: Vec<Vec<u8>>,
    pub on_register: bool,
    pub on_startup: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncLogReply {
    pub error_code: i64,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRoleRequest {
    pub node_name: String,
    pub target_role: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeRoleReply {
    pub error_code: i64,
    pub error_message: String,
}

/// Envelope of every request this crate can submit to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum TaskRequest {
    Register(RegisterRequest),
    Unregister(UnregisterRequest),
    HeartBeat(HeartBeatRequest),
    SyncLog(SyncLogRequest),
    ChangeRole(ChangeRoleRequest),
}

/// Envelope of every reply a peer can send back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskReply {
    Register(RegisterReply),
    Unregister(UnregisterReply),
    HeartBeat(HeartBeatReply),
    SyncLog(SyncLogReply),
    ChangeRole(ChangeRoleReply),
}

impl TaskReply {
    pub fn error_code(&self) -> i64 {
        match self {
            TaskReply::Register(r) => r.error_code,
            TaskReply::Unregister(r) => r.error_code,
            TaskReply::HeartBeat(r) => r.error_code,
            TaskReply::SyncLog(r) => r.error_code,
            TaskReply::ChangeRole(r) => r.error_code,
        }
    }

    pub fn error_message(&self) -> &str {
        match self {
            TaskReply::Register(r) => &r.error_message,
            TaskReply::Unregister(r) => &r.error_message,
            TaskReply::HeartBeat(r) => &r.error_message,
            TaskReply::SyncLog(r) => &r.error_message,
            TaskReply::ChangeRole(r) => &r.error_message,
        }
    }
}

/// A task in flight: the request payload plus the one-shot sender the
/// transport uses to deliver the reply. Constructed via [`new_task`], which
/// also hands back the [`TaskWait`] half the caller awaits.
pub struct PeerTask {
    pub request: TaskRequest,
    reply_tx: Mutex<Option<oneshot::Sender<TaskReply>>>,
}

impl PeerTask {
    /// Delivers the reply to whoever is waiting on this task. Called by the
    /// transport (or, for [`crate::peer::FakePeerClient`], by the in-process
    /// peer registry) at most once; later calls are no-ops.
    pub fn complete(&self, reply: TaskReply) {
        if let Some(tx) = self.reply_tx.lock().unwrap().take() {
            let _ = tx.send(reply);
        }
    }
}

/// The caller's half of a submitted task: `.wait()` for synchronous
/// semantics, or drop it for fire-and-forget.
pub struct TaskWait {
    rx: oneshot::Receiver<TaskReply>,
}

impl TaskWait {
    /// Awaits the reply and translates a non-zero `error_code` into an
    /// `Err`, mirroring the original's `task->Wait(); if (task->error_code_
    /// != 0) ...` pattern in one step.
    pub async fn wait(self) -> Result<TaskReply, ClusterError> {
        let reply = self
            .rx
            .await
            .map_err(|_| ClusterError::msg("peer client dropped task before replying"))?;
        if reply.error_code() != 0 {
            return Err(ClusterError::msg(reply.error_message().to_string()));
        }
        Ok(reply)
    }
}

/// Builds a task/wait pair for `request`.
pub fn new_task(request: TaskRequest) -> (PeerTask, TaskWait) {
    let (tx, rx) = oneshot::channel();
    (
        PeerTask {
            request,
            reply_tx: Mutex::new(Some(tx)),
        },
        TaskWait { rx },
    )
}
