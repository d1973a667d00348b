//! Cluster membership and WAL log-replication core for a leader/follower/
//! learner topology: admits readers into a cluster, synchronizes their WAL
//! on join, heartbeats for liveness, and fans out committed log entries.

pub mod config;
pub mod error;
pub mod manager;
pub mod node;
pub mod peer;
pub mod print;
pub mod server;
pub mod tasks;
pub mod wal;

pub use config::{ClusterConfig, ReaderInitPhase};
pub use error::{ClusterError, ClusterErrorKind};
pub use manager::{ClusterEnv, ClusterManager};
pub use node::{NodeInfo, NodeRole, NodeStatus, UpdateNodeOp};
pub use peer::{FakePeerClient, FakePeerDialer, InboundHandler, PeerClient, PeerDialer, PeerRegistry};
pub use server::PeerServerHandlers;
pub use wal::{FakeWalEngine, WalEngine};
