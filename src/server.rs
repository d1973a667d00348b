//! Inbound RPC endpoints (C5): thin adapters translating wire requests into
//! [`crate::manager::ClusterManager`] calls and mapping the result back onto
//! `error_code`/`error_message`. Registered with a [`crate::peer::PeerRegistry`]
//! as an [`crate::peer::InboundHandler`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ClusterError, ClusterErrorKind};
use crate::fail_fast;
use crate::manager::ClusterManager;
use crate::node::{NodeInfo, NodeRole, NodeStatus, UpdateNodeOp};
use crate::peer::InboundHandler;
use crate::pf_info;
use crate::tasks::{
    ChangeRoleReply, HeartBeatReply, HeartBeatRequest, RegisterReply, RegisterRequest, SyncLogReply, SyncLogRequest,
    TaskReply, TaskRequest, UnregisterReply, UnregisterRequest,
};

fn wire_error(e: &ClusterError) -> (i64, String) {
    (e.kind.to_wire_code(), e.message.clone())
}

fn invalid_role_error(what: &str) -> (i64, String) {
    (
        ClusterErrorKind::InvalidNodeRole.to_wire_code(),
        format!("attempt to {what} a non-leader node"),
    )
}

/// Translates [`TaskRequest`]s into calls against a single [`ClusterManager`].
/// One instance per local node; registered into the shared [`crate::peer::PeerRegistry`]
/// under that node's `(ip, port)`.
pub struct PeerServerHandlers {
    manager: Arc<ClusterManager>,
}

impl PeerServerHandlers {
    pub fn new(manager: Arc<ClusterManager>) -> Arc<Self> {
        Arc::new(PeerServerHandlers { manager })
    }

    async fn is_leader(&self) -> bool {
        matches!(self.manager.this_node().await, Some(n) if n.node_role == NodeRole::Leader)
    }

    async fn handle_register(&self, request: RegisterRequest) -> TaskReply {
        if !self.is_leader().await {
            let (error_code, error_message) = invalid_role_error("register");
            return TaskReply::Register(RegisterReply {
                error_code,
                error_message,
                ..Default::default()
            });
        }

        let mut node_info = NodeInfo::new(
            request.node_name.clone(),
            request.node_type.to_node_role(),
            request.node_ip,
            request.node_port,
        );
        node_info.node_status = NodeStatus::Alive;
        node_info.txn_timestamp = request.txn_timestamp;
        node_info.touch_now();

        match self.manager.add_node_info(node_info).await {
            Ok(()) => {
                pf_info!("node {} registered as {:?}", request.node_name, request.node_type);
                let leader = self.manager.this_node().await.expect("leader role checked above");
                TaskReply::Register(RegisterReply {
                    leader_name: leader.node_name,
                    leader_term: leader.leader_term,
                    heart_beat_interval: leader.heartbeat_interval_ms,
                    error_code: 0,
                    error_message: String::new(),
                })
            }
            Err(e) => {
                let (error_code, error_message) = wire_error(&e);
                TaskReply::Register(RegisterReply {
                    error_code,
                    error_message,
                    ..Default::default()
                })
            }
        }
    }

    async fn handle_unregister(&self, request: UnregisterRequest) -> TaskReply {
        if !self.is_leader().await {
            let (error_code, error_message) = invalid_role_error("unregister from");
            return TaskReply::Unregister(UnregisterReply { error_code, error_message });
        }
        match self.manager.update_node_by_leader(&request.node_name, UpdateNodeOp::Remove).await {
            Ok(()) => {
                pf_info!("node {} unregistered from leader", request.node_name);
                TaskReply::Unregister(UnregisterReply::default())
            }
            Err(e) => {
                let (error_code, error_message) = wire_error(&e);
                TaskReply::Unregister(UnregisterReply { error_code, error_message })
            }
        }
    }

    async fn handle_heartbeat(&self, request: HeartBeatRequest) -> TaskReply {
        if !self.is_leader().await {
            let (error_code, error_message) = invalid_role_error("heartbeat to");
            return TaskReply::HeartBeat(HeartBeatReply {
                error_code,
                error_message,
                ..Default::default()
            });
        }
        match self
            .manager
            .update_node_info_by_heartbeat(&request.node_name, &request.node_ip, request.node_port, request.txn_timestamp)
            .await
        {
            Ok(reply) => TaskReply::HeartBeat(reply),
            Err(e) => {
                let (error_code, error_message) = wire_error(&e);
                TaskReply::HeartBeat(HeartBeatReply {
                    error_code,
                    error_message,
                    ..Default::default()
                })
            }
        }
    }

    async fn handle_sync_log(&self, request: SyncLogRequest) -> TaskReply {
        if request.log_entries.is_empty() {
            fail_fast!("no log is synced from leader node");
        }
        match self.manager.this_node().await.map(|n| n.node_role) {
            Some(NodeRole::Follower) | Some(NodeRole::Learner) => {}
            other => {
                return TaskReply::SyncLog(SyncLogReply {
                    error_code: ClusterErrorKind::InvalidNodeRole.to_wire_code(),
                    error_message: format!("attempt to sync logs to a {other:?} node"),
                });
            }
        }

        self.manager.flush_synced_log(&request.log_entries).await;

        let result = if request.on_startup {
            self.manager.continue_startup(&request.log_entries).await
        } else {
            self.manager.apply_synced_log_no_lock(&request.log_entries).await
        };
        match result {
            Ok(()) => TaskReply::SyncLog(SyncLogReply::default()),
            Err(e) => {
                let (error_code, error_message) = wire_error(&e);
                TaskReply::SyncLog(SyncLogReply { error_code, error_message })
            }
        }
    }

    async fn handle_change_role(&self, request: crate::tasks::ChangeRoleRequest) -> TaskReply {
        if request.target_role != "admin" {
            return TaskReply::ChangeRole(ChangeRoleReply {
                error_code: ClusterErrorKind::NotSupport.to_wire_code(),
                error_message: format!("unsupported role-change target: {}", request.target_role),
            });
        }
        pf_info!("demoted to admin by leader, tearing down membership");
        match self.manager.uninit(true).await {
            Ok(()) => TaskReply::ChangeRole(ChangeRoleReply::default()),
            Err(e) => {
                let (error_code, error_message) = wire_error(&e);
                TaskReply::ChangeRole(ChangeRoleReply { error_code, error_message })
            }
        }
    }
}

#[async_trait]
impl InboundHandler for PeerServerHandlers {
    async fn handle(&self, request: TaskRequest) -> TaskReply {
        match request {
            TaskRequest::Register(r) => self.handle_register(r).await,
            TaskRequest::Unregister(r) => self.handle_unregister(r).await,
            TaskRequest::HeartBeat(r) => self.handle_heartbeat(r).await,
            TaskRequest::SyncLog(r) => self.handle_sync_log(r).await,
            TaskRequest::ChangeRole(r) => self.handle_change_role(r).await,
        }
    }
}
