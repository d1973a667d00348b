//! End-to-end scenarios exercising registration, heartbeat, replication, and
//! removal against the in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use walmesh::{
    ClusterConfig, ClusterEnv, ClusterErrorKind, ClusterManager, FakePeerDialer, FakeWalEngine, NodeInfo, NodeRole,
    NodeStatus, PeerRegistry, PeerServerHandlers, ReaderInitPhase, UpdateNodeOp,
};

/// Builds a fresh `ClusterEnv` plus the concrete `FakeWalEngine` handle
/// backing it, so tests can drive/inspect the WAL directly instead of
/// reaching into `ClusterManager`'s private `env` field.
fn env(dialer: Arc<FakePeerDialer>, port: u16, heartbeat_interval_ms: u64) -> (ClusterEnv, Arc<FakeWalEngine>) {
    let wal = Arc::new(FakeWalEngine::new(ReaderInitPhase::Phase1));
    let cluster_env = ClusterEnv {
        wal: wal.clone(),
        dialer,
        config: ClusterConfig {
            peer_server_ip: "10.0.0.1".to_string(),
            peer_server_port: port,
            heartbeat_interval_ms,
            ..Default::default()
        },
    };
    (cluster_env, wal)
}

async fn spawn_leader(
    registry: &Arc<PeerRegistry>,
    port: u16,
    heartbeat_interval_ms: u64,
) -> (Arc<ClusterManager>, Arc<FakeWalEngine>) {
    let dialer = FakePeerDialer::new(registry.clone());
    let (cluster_env, wal) = env(dialer, port, heartbeat_interval_ms);
    let leader = ClusterManager::new(cluster_env);
    leader.init_as_leader("leader").await.unwrap();
    registry
        .register("10.0.0.1", port, PeerServerHandlers::new(leader.clone()))
        .await;
    (leader, wal)
}

async fn join_follower(
    registry: &Arc<PeerRegistry>,
    leader_port: u16,
    name: &str,
    port: u16,
    heartbeat_interval_ms: u64,
) -> (Arc<ClusterManager>, Arc<FakeWalEngine>) {
    let dialer = FakePeerDialer::new(registry.clone());
    let (cluster_env, wal) = env(dialer, port, heartbeat_interval_ms);
    let mgr = ClusterManager::new(cluster_env);
    mgr.init_as_follower(name, "10.0.0.1", leader_port).await.unwrap();
    registry.register("10.0.0.1", port, PeerServerHandlers::new(mgr.clone())).await;
    mgr.register_to_leader().await.unwrap();
    (mgr, wal)
}

async fn join_learner(
    registry: &Arc<PeerRegistry>,
    leader_port: u16,
    name: &str,
    port: u16,
    heartbeat_interval_ms: u64,
) -> (Arc<ClusterManager>, Arc<FakeWalEngine>) {
    let dialer = FakePeerDialer::new(registry.clone());
    let (cluster_env, wal) = env(dialer, port, heartbeat_interval_ms);
    let mgr = ClusterManager::new(cluster_env);
    mgr.init_as_learner(name, "10.0.0.1", leader_port).await.unwrap();
    registry.register("10.0.0.1", port, PeerServerHandlers::new(mgr.clone())).await;
    mgr.register_to_leader().await.unwrap();
    (mgr, wal)
}

#[tokio::test]
async fn simple_join_syncs_wal_diff_and_lists_node() {
    let registry = PeerRegistry::new();
    let (leader, leader_wal) = spawn_leader(&registry, 6001, 1000).await;
    leader_wal.commit(vec![]);
    leader_wal.commit(vec![]);
    leader_wal.commit(vec![]);

    let (_follower, follower_wal) = join_follower(&registry, 6001, "f1", 6002, 1000).await;

    let nodes = leader.list_nodes().await;
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node_name, "leader");
    assert_eq!(nodes[1].node_name, "f1");
    assert_eq!(nodes[1].node_role, NodeRole::Follower);
    assert_eq!(nodes[1].node_status, NodeStatus::Alive);

    assert_eq!(follower_wal.replayed_entries().len(), 3);
}

#[tokio::test]
async fn duplicate_join_is_rejected() {
    let registry = PeerRegistry::new();
    let (leader, _leader_wal) = spawn_leader(&registry, 6101, 1000).await;
    let (_f1, _f1_wal) = join_follower(&registry, 6101, "f1", 6102, 1000).await;

    let dup_node = NodeInfo::new("f1", NodeRole::Follower, "10.0.0.1", 6102);
    let err = leader.add_node_info(dup_node).await.unwrap_err();
    assert_eq!(err.kind, ClusterErrorKind::DuplicateNode);

    assert_eq!(leader.list_nodes().await.len(), 2);
}

#[tokio::test]
async fn heartbeat_address_drift_is_rejected() {
    let registry = PeerRegistry::new();
    let (leader, _leader_wal) = spawn_leader(&registry, 6201, 1000).await;
    let (_f1, _f1_wal) = join_follower(&registry, 6201, "f1", 6202, 1000).await;

    let err = leader
        .update_node_info_by_heartbeat("f1", "10.0.0.9", 6202, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ClusterErrorKind::NodeInfoUpdated);

    let stored = leader.get_node_info_by_name("f1").await.unwrap();
    assert_eq!(stored.ip_address, "10.0.0.1");
}

#[tokio::test]
async fn timeout_sweep_marks_stale_peer() {
    let registry = PeerRegistry::new();
    let (leader, _leader_wal) = spawn_leader(&registry, 6301, 200).await;

    // Admit the follower without starting its heartbeat loop, so nothing
    // keeps refreshing `last_update_ts` while the sweep runs.
    let dialer = FakePeerDialer::new(registry.clone());
    let (follower_env, _follower_wal) = env(dialer, 6302, 200);
    let follower = ClusterManager::new(follower_env);
    follower.init_as_follower("f1", "10.0.0.1", 6301).await.unwrap();
    registry
        .register("10.0.0.1", 6302, PeerServerHandlers::new(follower.clone()))
        .await;
    leader
        .add_node_info(NodeInfo::new("f1", NodeRole::Follower, "10.0.0.1", 6302))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let node = leader.get_node_info_by_name("f1").await.unwrap();
    assert_eq!(node.node_status, NodeStatus::Timeout);
}

#[tokio::test]
async fn log_fanout_reaches_followers_and_learners() {
    let registry = PeerRegistry::new();
    let (leader, leader_wal) = spawn_leader(&registry, 6401, 1000).await;
    let (_f1, f1_wal) = join_follower(&registry, 6401, "f1", 6402, 1000).await;
    let (_f2, f2_wal) = join_follower(&registry, 6401, "f2", 6403, 1000).await;
    let (_learner, learner_wal) = join_learner(&registry, 6401, "ln", 6404, 1000).await;

    let e1 = leader_wal.commit(vec![]).encode();
    let e2 = leader_wal.commit(vec![]).encode();
    leader.prepare_logs(e1).await;
    leader.prepare_logs(e2).await;
    leader.sync_logs().await.unwrap();

    assert_eq!(f1_wal.replayed_entries().len(), 2);
    assert_eq!(f2_wal.replayed_entries().len(), 2);

    for _ in 0..25 {
        if learner_wal.replayed_entries().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(learner_wal.replayed_entries().len(), 2);
}

#[tokio::test]
async fn remove_propagates_and_future_heartbeats_see_not_exist() {
    let registry = PeerRegistry::new();
    let (leader, _leader_wal) = spawn_leader(&registry, 6501, 1000).await;
    let (_f1, _f1_wal) = join_follower(&registry, 6501, "f1", 6502, 1000).await;

    leader.remove_node_info("f1").await.unwrap();
    assert!(leader.get_node_info_by_name("f1").await.is_none());

    let err = leader
        .update_node_info_by_heartbeat("f1", "10.0.0.1", 6502, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ClusterErrorKind::NotExistNode);
}

#[tokio::test]
async fn update_node_by_leader_lost_connection_keeps_membership_record() {
    let registry = PeerRegistry::new();
    let (leader, _leader_wal) = spawn_leader(&registry, 6601, 1000).await;
    let (_f1, _f1_wal) = join_follower(&registry, 6601, "f1", 6602, 1000).await;

    leader.update_node_by_leader("f1", UpdateNodeOp::LostConnection).await.unwrap();
    let node = leader.get_node_info_by_name("f1").await.unwrap();
    assert_eq!(node.node_status, NodeStatus::LostConnection);
}

#[tokio::test]
async fn follower_count_rejects_above_five() {
    let registry = PeerRegistry::new();
    let (leader, _leader_wal) = spawn_leader(&registry, 6701, 1000).await;

    let err = leader.set_follower_number(6).await.unwrap_err();
    assert_eq!(err.kind, ClusterErrorKind::NotSupport);

    leader.set_follower_number(5).await.unwrap();
    assert_eq!(leader.get_follower_number().await, 5);
}
