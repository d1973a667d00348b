//! Demonstration binary: spins up one leader plus a configurable number of
//! followers and learners, all wired to the same in-process `PeerRegistry`,
//! drives the registration/heartbeat/replication protocol to completion, and
//! prints the leader's membership view before shutting everything down.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;

use walmesh::{ClusterConfig, ClusterEnv, ClusterManager, FakePeerDialer, FakeWalEngine, PeerRegistry, PeerServerHandlers, ReaderInitPhase};

#[derive(Parser)]
#[command(about = "Runs a walmesh cluster with in-memory fakes for storage and transport")]
struct Args {
    /// Number of followers to bring up alongside the leader.
    #[arg(long, default_value_t = 2)]
    followers: usize,

    /// Number of learners to bring up alongside the leader.
    #[arg(long, default_value_t = 1)]
    learners: usize,

    #[arg(long, default_value_t = 200)]
    heartbeat_interval_ms: u64,

    /// How long to run before printing membership and shutting down, unless
    /// interrupted first.
    #[arg(long, default_value_t = 3)]
    run_seconds: u64,
}

fn node_env(dialer: Arc<FakePeerDialer>, port: u16, heartbeat_interval_ms: u64) -> ClusterEnv {
    ClusterEnv {
        wal: Arc::new(FakeWalEngine::new(ReaderInitPhase::Phase1)),
        dialer,
        config: ClusterConfig {
            peer_server_ip: "127.0.0.1".to_string(),
            peer_server_port: port,
            heartbeat_interval_ms,
            ..Default::default()
        },
    }
}

#[tokio::main]
async fn main() {
    walmesh::print::logger_init();
    let args = Args::parse();

    let registry = PeerRegistry::new();
    let dialer = FakePeerDialer::new(registry.clone());

    const LEADER_PORT: u16 = 7000;
    let leader = ClusterManager::new(node_env(dialer.clone(), LEADER_PORT, args.heartbeat_interval_ms));
    leader.init_as_leader("leader").await.expect("init leader");
    registry
        .register("127.0.0.1", LEADER_PORT, PeerServerHandlers::new(leader.clone()))
        .await;

    let mut readers = Vec::new();
    let mut next_port = LEADER_PORT + 1;

    for i in 0..args.followers {
        let port = next_port;
        next_port += 1;
        let name = format!("follower-{i}");
        let mgr = ClusterManager::new(node_env(dialer.clone(), port, args.heartbeat_interval_ms));
        mgr.init_as_follower(&name, "127.0.0.1", LEADER_PORT)
            .await
            .unwrap_or_else(|e| panic!("init {name} as follower: {e}"));
        registry.register("127.0.0.1", port, PeerServerHandlers::new(mgr.clone())).await;
        mgr.register_to_leader()
            .await
            .unwrap_or_else(|e| panic!("register {name} with leader: {e}"));
        readers.push((name, mgr));
    }

    for i in 0..args.learners {
        let port = next_port;
        next_port += 1;
        let name = format!("learner-{i}");
        let mgr = ClusterManager::new(node_env(dialer.clone(), port, args.heartbeat_interval_ms));
        mgr.init_as_learner(&name, "127.0.0.1", LEADER_PORT)
            .await
            .unwrap_or_else(|e| panic!("init {name} as learner: {e}"));
        registry.register("127.0.0.1", port, PeerServerHandlers::new(mgr.clone())).await;
        mgr.register_to_leader()
            .await
            .unwrap_or_else(|e| panic!("register {name} with leader: {e}"));
        readers.push((name, mgr));
    }

    leader.prepare_logs(vec![1, 2, 3]).await;
    leader.sync_logs().await.expect("sync logs to readers");

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.notify_one()).expect("install Ctrl-C handler");
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.run_seconds)) => {}
        _ = shutdown.notified() => {}
    }

    println!("leader membership view:");
    for node in leader.list_nodes().await {
        println!("  {node:?}");
    }

    for (name, mgr) in readers {
        if let Err(e) = mgr.uninit(false).await {
            eprintln!("failed to uninit {name}: {e}");
        }
    }
    leader.uninit(true).await.expect("uninit leader");
}
