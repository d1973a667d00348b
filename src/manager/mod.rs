//! The membership state machine and replication orchestrator (C4). This is
//! the hard core of the crate: every other module exists to serve this one.

mod admin;
mod heartbeat;
mod registration;
mod removal;
mod replication;
mod startup;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::node::{NodeInfo, NodeRole, NodeStatus};
use crate::peer::{PeerClient, PeerDialer};
use crate::wal::WalEngine;
use crate::{fail_fast, pf_info};

/// Everything [`ClusterManager`] needs from the outside world, injected
/// explicitly at construction time instead of reached through a process-wide
/// singleton (see `SPEC_FULL.md` §9, "global singleton").
pub struct ClusterEnv {
    pub wal: Arc<dyn WalEngine>,
    pub dialer: Arc<dyn PeerDialer>,
    pub config: ClusterConfig,
}

/// Everything guarded by the single ClusterManager mutex (invariant: all map
/// mutations and `NodeInfo` field reads/writes happen while this is locked).
pub(super) struct ManagerState {
    pub(super) this_node: Option<NodeInfo>,
    pub(super) leader_node: Option<NodeInfo>,
    pub(super) other_node_map: HashMap<String, NodeInfo>,
    pub(super) reader_client_map: HashMap<String, Arc<dyn PeerClient>>,
    pub(super) client_to_leader: Option<Arc<dyn PeerClient>>,
    pub(super) logs_to_sync: Vec<Vec<u8>>,
    pub(super) follower_count: usize,
}

impl ManagerState {
    fn new() -> Self {
        ManagerState {
            this_node: None,
            leader_node: None,
            other_node_map: HashMap::new(),
            reader_client_map: HashMap::new(),
            client_to_leader: None,
            logs_to_sync: Vec::new(),
            follower_count: 0,
        }
    }

    /// Panics (per `fail_fast!`) unless `this_node` is initialized and
    /// holds the given role. Used at the top of every leader-only or
    /// reader-only operation, matching the original's role-check-then-
    /// `UnrecoverableError` pattern.
    pub(super) fn require_role(&self, expected: NodeRole) {
        match &self.this_node {
            Some(n) if n.node_role == expected => {}
            Some(n) => fail_fast!("invalid node role: expected {:?}, got {:?}", expected, n.node_role),
            None => fail_fast!("cluster manager not initialized"),
        }
    }

    pub(super) fn this_node_mut(&mut self) -> &mut NodeInfo {
        self.this_node.as_mut().expect("this_node initialized")
    }

    pub(super) fn leader_node_mut(&mut self) -> &mut NodeInfo {
        self.leader_node.as_mut().expect("leader_node initialized")
    }
}

/// The membership state machine and replication orchestrator. Owns node
/// records and peer clients; every field is reachable only through
/// [`ClusterManager::lock`] or the heartbeat lifecycle flags below.
pub struct ClusterManager {
    pub(super) env: ClusterEnv,
    pub(super) state: Mutex<ManagerState>,
    pub(super) hb_running: AtomicBool,
    pub(super) hb_notify: Notify,
    pub(super) hb_thread: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClusterManager {
    /// The storage/WAL engine collaborator, for callers that need to drive
    /// or inspect it directly (e.g. committing entries to replicate, or
    /// reading back what a reader replayed).
    pub fn wal(&self) -> &Arc<dyn WalEngine> {
        &self.env.wal
    }

    pub fn new(env: ClusterEnv) -> Arc<Self> {
        Arc::new(ClusterManager {
            env,
            state: Mutex::new(ManagerState::new()),
            hb_running: AtomicBool::new(false),
            hb_notify: Notify::new(),
            hb_thread: std::sync::Mutex::new(None),
        })
    }

    /// Initializes `this_node` as the cluster leader and spawns the
    /// timeout-sweep heartbeat task. Fails with `ErrorInit` if already
    /// initialized (invariant 1).
    pub async fn init_as_leader(self: &Arc<Self>, node_name: impl Into<String>) -> Result<(), ClusterError> {
        {
            let mut state = self.state.lock().await;
            if state.this_node.is_some() {
                return Err(ClusterError::init("init node as leader error: already initialized"));
            }
            let mut node = NodeInfo::new(
                node_name,
                NodeRole::Leader,
                self.env.config.peer_server_ip.clone(),
                self.env.config.peer_server_port,
            );
            node.node_status = NodeStatus::Alive;
            node.heartbeat_interval_ms = self.env.config.heartbeat_interval_ms;
            node.touch_now();
            crate::print::set_me(node.node_name.clone());
            pf_info!("initialized as leader");
            state.this_node = Some(node);
            state.follower_count = self.env.config.follower_count;
        }
        self.spawn_heartbeat_sweep();
        Ok(())
    }

    /// Initializes `this_node` as a follower and dials the leader. Fails
    /// with `ErrorInit` if already initialized.
    pub async fn init_as_follower(
        self: &Arc<Self>,
        node_name: impl Into<String>,
        leader_ip: impl Into<String>,
        leader_port: u16,
    ) -> Result<(), ClusterError> {
        self.init_as_reader(node_name, NodeRole::Follower, leader_ip, leader_port).await
    }

    /// Initializes `this_node` as a learner and dials the leader. Fails
    /// with `ErrorInit` if already initialized.
    pub async fn init_as_learner(
        self: &Arc<Self>,
        node_name: impl Into<String>,
        leader_ip: impl Into<String>,
        leader_port: u16,
    ) -> Result<(), ClusterError> {
        self.init_as_reader(node_name, NodeRole::Learner, leader_ip, leader_port).await
    }

    async fn init_as_reader(
        self: &Arc<Self>,
        node_name: impl Into<String>,
        role: NodeRole,
        leader_ip: impl Into<String>,
        leader_port: u16,
    ) -> Result<(), ClusterError> {
        let leader_ip = leader_ip.into();
        let mut node = NodeInfo::new(
            node_name,
            role,
            self.env.config.peer_server_ip.clone(),
            self.env.config.peer_server_port,
        );
        node.node_status = NodeStatus::Alive;
        node.touch_now();
        crate::print::set_me(node.node_name.clone());

        let mut leader = NodeInfo::new("", NodeRole::Leader, leader_ip.clone(), leader_port);
        leader.node_status = NodeStatus::Invalid;

        let client = self.env.dialer.dial(&leader_ip, leader_port);
        client.init().await?;

        let mut state = self.state.lock().await;
        if state.this_node.is_some() {
            return Err(ClusterError::init(format!(
                "init node as {role:?} error: already initialized"
            )));
        }
        pf_info!("initialized as {:?}, dialled leader at {}:{}", role, leader_ip, leader_port);
        state.this_node = Some(node);
        state.leader_node = Some(leader);
        state.client_to_leader = Some(client);
        Ok(())
    }

    /// Tears everything down: stops the heartbeat task, optionally
    /// unregisters from the leader, then clears all state and closes the
    /// leader client. Returns to the uninitialized terminal state.
    pub async fn uninit(self: &Arc<Self>, skip_unregister: bool) -> Result<(), ClusterError> {
        self.hb_running.store(false, std::sync::atomic::Ordering::SeqCst);
        self.hb_notify.notify_waiters();
        let handle = self.hb_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        if !skip_unregister {
            self.unregister_to_leader_no_lock().await?;
        }

        let mut state = self.state.lock().await;
        state.other_node_map.clear();
        state.leader_node = None;
        state.this_node = None;
        if let Some(client) = state.client_to_leader.take() {
            client.uninit(true).await;
        }
        state.reader_client_map.clear();
        state.logs_to_sync.clear();
        pf_info!("cluster manager uninitialized");
        Ok(())
    }
}
