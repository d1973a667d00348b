//! A connected RPC channel to one remote node (C2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::task::JoinHandle;

use crate::error::ClusterError;
use crate::tasks::{PeerTask, TaskReply, TaskRequest};
use crate::{pf_debug, pf_warn};

/// Inbound adapter a [`PeerClient`] dials into. Implemented by
/// [`crate::server::PeerServerHandlers`]; kept as its own trait here so that
/// `peer` never needs to depend on `manager`/`server`, avoiding the cyclic
/// ownership the original system's manager/client pair has (see
/// `SPEC_FULL.md` §9).
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, request: TaskRequest) -> TaskReply;
}

/// A connected RPC channel to one remote node. A real implementation would
/// own a TCP or gRPC connection; [`FakePeerClient`] below routes to an
/// in-process [`PeerRegistry`] instead, so the full protocol runs without a
/// socket.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Dials the remote endpoint. Idempotent with `uninit`.
    async fn init(&self) -> Result<(), ClusterError>;

    /// Non-blocking liveness view.
    fn server_connected(&self) -> bool;

    /// Attempts to re-establish the transport.
    async fn reconnect(&self) -> Result<(), ClusterError>;

    /// Enqueues `task` for transmission; non-blocking. Safe to call from
    /// multiple call sites; tasks from one sender are delivered FIFO.
    fn send(&self, task: PeerTask) -> Result<(), ClusterError>;

    /// Closes the channel. If `graceful` is false, in-flight work is
    /// dropped rather than drained.
    async fn uninit(&self, graceful: bool);
}

/// Process-wide directory mapping a node's `(ip, port)` to the
/// [`InboundHandler`] that should receive tasks addressed there. Stands in
/// for DNS + socket dialling in this in-process transport.
#[derive(Default)]
pub struct PeerRegistry {
    handlers: AsyncRwLock<HashMap<(String, u16), Arc<dyn InboundHandler>>>,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(PeerRegistry::default())
    }

    pub async fn register(&self, ip: impl Into<String>, port: u16, handler: Arc<dyn InboundHandler>) {
        self.handlers.write().await.insert((ip.into(), port), handler);
    }

    pub async fn unregister(&self, ip: &str, port: u16) {
        self.handlers.write().await.remove(&(ip.to_string(), port));
    }

    async fn lookup(&self, ip: &str, port: u16) -> Option<Arc<dyn InboundHandler>> {
        self.handlers.read().await.get(&(ip.to_string(), port)).cloned()
    }
}

/// In-process [`PeerClient`] used by tests and the `walmesh_node`
/// demonstration binary.
pub struct FakePeerClient {
    target_ip: String,
    target_port: u16,
    registry: Arc<PeerRegistry>,
    connected: AtomicBool,
    tx: Mutex<Option<mpsc::UnboundedSender<PeerTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FakePeerClient {
    pub fn new(target_ip: impl Into<String>, target_port: u16, registry: Arc<PeerRegistry>) -> Self {
        FakePeerClient {
            target_ip: target_ip.into(),
            target_port,
            registry,
            connected: AtomicBool::new(false),
            tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    fn spawn_worker(&self, mut rx: mpsc::UnboundedReceiver<PeerTask>) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let ip = self.target_ip.clone();
        let port = self.target_port;
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                match registry.lookup(&ip, port).await {
                    Some(handler) => {
                        let reply = handler.handle(task.request.clone()).await;
                        task.complete(reply);
                    }
                    None => {
                        pf_debug!("no peer registered at {}:{}, dropping task", ip, port);
                        // task's reply_tx is dropped here; the waiter observes
                        // a failed send as an error, matching a transport
                        // failure.
                    }
                }
            }
        })
    }
}

#[async_trait]
impl PeerClient for FakePeerClient {
    async fn init(&self) -> Result<(), ClusterError> {
        if self.registry.lookup(&self.target_ip, self.target_port).await.is_none() {
            return Err(ClusterError::msg(format!(
                "dial failed: no peer listening at {}:{}",
                self.target_ip, self.target_port
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock().unwrap() = Some(tx);
        *self.worker.lock().unwrap() = Some(self.spawn_worker(rx));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn server_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), ClusterError> {
        if self.registry.lookup(&self.target_ip, self.target_port).await.is_none() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(ClusterError::msg(format!(
                "reconnect failed: no peer listening at {}:{}",
                self.target_ip, self.target_port
            )));
        }
        if self.tx.lock().unwrap().is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.tx.lock().unwrap() = Some(tx);
            *self.worker.lock().unwrap() = Some(self.spawn_worker(rx));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, task: PeerTask) -> Result<(), ClusterError> {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx
                .send(task)
                .map_err(|_| ClusterError::msg("peer client worker is gone")),
            None => Err(ClusterError::msg("peer client not initialized")),
        }
    }

    async fn uninit(&self, graceful: bool) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx); // closes the channel; worker drains remaining tasks then exits
        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            if graceful {
                if let Err(e) = handle.await {
                    pf_warn!("peer client worker join failed: {}", e);
                }
            } else {
                handle.abort();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Creates a new [`PeerClient`] pointed at a given `ip:port`. Injected into
/// [`crate::manager::ClusterManager`] as part of its `ClusterEnv`, instead
/// of the manager reaching for a concrete transport constructor directly —
/// this is what lets `AddNodeInfo`/`InitAsFollower` dial without knowing
/// whether the real deployment uses TCP, gRPC, or (as in tests) the
/// in-process [`PeerRegistry`].
pub trait PeerDialer: Send + Sync {
    fn dial(&self, ip: &str, port: u16) -> Arc<dyn PeerClient>;
}

/// [`PeerDialer`] that hands out [`FakePeerClient`]s wired to a shared
/// [`PeerRegistry`].
pub struct FakePeerDialer {
    registry: Arc<PeerRegistry>,
}

impl FakePeerDialer {
    pub fn new(registry: Arc<PeerRegistry>) -> Arc<Self> {
        Arc::new(FakePeerDialer { registry })
    }
}

impl PeerDialer for FakePeerDialer {
    fn dial(&self, ip: &str, port: u16) -> Arc<dyn PeerClient> {
        Arc::new(FakePeerClient::new(ip.to_string(), port, self.registry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{new_task, RegisterReply, RegisterRequest, TaskReply, WireNodeType};

    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle(&self, request: TaskRequest) -> TaskReply {
            match request {
                TaskRequest::Register(RegisterRequest { node_name, .. }) => TaskReply::Register(RegisterReply {
                    leader_name: format!("leader-for-{node_name}"),
                    leader_term: 1,
                    heart_beat_interval: 1000,
                    error_code: 0,
                    error_message: String::new(),
                }),
                _ => unreachable!(),
            }
        }
    }

    #[tokio::test]
    async fn dial_fails_without_registration() {
        let registry = PeerRegistry::new();
        let client = FakePeerClient::new("10.0.0.1", 6001, registry);
        assert!(client.init().await.is_err());
    }

    #[tokio::test]
    async fn send_and_wait_round_trips() {
        let registry = PeerRegistry::new();
        registry.register("10.0.0.1", 6001, Arc::new(EchoHandler)).await;
        let client = FakePeerClient::new("10.0.0.1", 6001, registry);
        client.init().await.unwrap();
        assert!(client.server_connected());

        let (task, wait) = new_task(TaskRequest::Register(RegisterRequest {
            node_name: "f1".into(),
            node_type: WireNodeType::Follower,
            node_ip: "10.0.0.2".into(),
            node_port: 6001,
            txn_timestamp: 0,
        }));
        client.send(task).unwrap();
        let reply = wait.wait().await.unwrap();
        match reply {
            TaskReply::Register(r) => assert_eq!(r.leader_name, "leader-for-f1"),
            _ => panic!("wrong reply variant"),
        }
    }

    #[tokio::test]
    async fn uninit_ungraceful_drops_pending() {
        let registry = PeerRegistry::new();
        registry.register("10.0.0.9", 1, Arc::new(EchoHandler)).await;
        let client = FakePeerClient::new("10.0.0.9", 1, registry.clone());
        client.init().await.unwrap();
        registry.unregister("10.0.0.9", 1).await;
        client.uninit(false).await;
        assert!(!client.server_connected());
        drop(client);
    }
}
