//! The storage/WAL engine collaborator (§6). Out of scope for this slice's
//! hard core, but its interface is part of the product surface: the
//! replication logic in [`crate::manager`] is written entirely against the
//! [`WalEngine`] trait, never against a concrete storage engine.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ReaderInitPhase;
use crate::error::ClusterError;

/// A single WAL command. Only `Checkpoint` is distinguished by type for
/// bootstrap validation; all other command kinds are opaque payload to this
/// crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalCommandType {
    Checkpoint,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalCommand {
    pub cmd_type: WalCommandType,
    pub payload: Vec<u8>,
}

/// A committed, ordered unit of state change. This is the unit replicated
/// between leader and readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub txn_id: u64,
    pub commit_ts: u64,
    pub cmds: Vec<WalCommand>,
}

impl WalEntry {
    /// Length-delimited decode of a single entry from its wire bytes, per
    /// the WAL entry byte format contract in §6.
    pub fn decode(bytes: &[u8]) -> Result<Self, ClusterError> {
        bincode::deserialize(bytes).map_err(|e| ClusterError::msg(format!("bad WAL entry encoding: {e}")))
    }

    /// Encodes this entry to its wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("WalEntry always serializes")
    }
}

/// Required operations on the storage/WAL engine collaborator (§6). A real
/// implementation would forward these onto the database's durable log;
/// [`FakeWalEngine`] below is an in-memory stand-in used by tests and the
/// demonstration binary.
#[async_trait]
pub trait WalEngine: Send + Sync {
    /// Current WAL commit timestamp.
    async fn current_commit_ts(&self) -> u64;

    /// Ordered WAL entries committed strictly after `since_ts`, encoded per
    /// [`WalEntry::encode`].
    async fn get_diff_wal_entries_since(&self, since_ts: u64) -> Vec<Vec<u8>>;

    /// Replays a single WAL entry. `is_replay` distinguishes bootstrap
    /// catch-up (`true`) from steady-state application (`false`).
    async fn replay_wal_entry(&self, entry: &WalEntry, is_replay: bool);

    /// Advances the durable commit state.
    async fn update_commit_state(&self, commit_ts: u64, extra: u64);

    /// Sets the transaction manager's start timestamp.
    async fn set_start_ts(&self, ts: u64);

    /// Sets the catalog's next transaction id.
    async fn set_next_txn_id(&self, id: u64);

    /// Persists an incoming replica stream before it is applied.
    async fn flush_log_by_replication(&self, entries: &[Vec<u8>]);

    /// Controls whether registration ships the real `txn_timestamp` or `0`.
    fn reader_init_phase(&self) -> ReaderInitPhase;

    /// Marks reader-mode storage as continuable from `ts` after bootstrap
    /// catch-up finishes.
    async fn set_reader_storage_continue(&self, ts: u64);
}

/// In-memory [`WalEngine`] used by tests and the `walmesh_node` demonstration
/// binary. Not suitable for production: nothing here survives a restart.
pub struct FakeWalEngine {
    inner: Mutex<FakeWalInner>,
    reader_init_phase: ReaderInitPhase,
}

struct FakeWalInner {
    entries: Vec<WalEntry>,
    commit_ts: u64,
    next_txn_id: u64,
    start_ts: u64,
    reader_continue_ts: Option<u64>,
    replayed: Vec<(WalEntry, bool)>,
}

impl FakeWalEngine {
    pub fn new(reader_init_phase: ReaderInitPhase) -> Self {
        FakeWalEngine {
            inner: Mutex::new(FakeWalInner {
                entries: Vec::new(),
                commit_ts: 0,
                next_txn_id: 0,
                start_ts: 0,
                reader_continue_ts: None,
                replayed: Vec::new(),
            }),
            reader_init_phase,
        }
    }

    /// Test/demo helper: appends a committed entry to the leader-side log.
    pub fn commit(&self, cmds: Vec<WalCommand>) -> WalEntry {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_ts += 1;
        inner.next_txn_id += 1;
        let entry = WalEntry {
            txn_id: inner.next_txn_id,
            commit_ts: inner.commit_ts,
            cmds,
        };
        inner.entries.push(entry.clone());
        entry
    }

    pub fn replayed_entries(&self) -> Vec<(WalEntry, bool)> {
        self.inner.lock().unwrap().replayed.clone()
    }

    pub fn reader_continue_ts(&self) -> Option<u64> {
        self.inner.lock().unwrap().reader_continue_ts
    }
}

#[async_trait]
impl WalEngine for FakeWalEngine {
    async fn current_commit_ts(&self) -> u64 {
        self.inner.lock().unwrap().commit_ts
    }

    async fn get_diff_wal_entries_since(&self, since_ts: u64) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.commit_ts > since_ts)
            .map(WalEntry::encode)
            .collect()
    }

    async fn replay_wal_entry(&self, entry: &WalEntry, is_replay: bool) {
        self.inner.lock().unwrap().replayed.push((entry.clone(), is_replay));
    }

    async fn update_commit_state(&self, commit_ts: u64, _extra: u64) {
        self.inner.lock().unwrap().commit_ts = commit_ts;
    }

    async fn set_start_ts(&self, ts: u64) {
        self.inner.lock().unwrap().start_ts = ts;
    }

    async fn set_next_txn_id(&self, id: u64) {
        self.inner.lock().unwrap().next_txn_id = id;
    }

    async fn flush_log_by_replication(&self, entries: &[Vec<u8>]) {
        let mut inner = self.inner.lock().unwrap();
        for bytes in entries {
            if let Ok(entry) = WalEntry::decode(bytes) {
                inner.entries.push(entry);
            }
        }
    }

    fn reader_init_phase(&self) -> ReaderInitPhase {
        self.reader_init_phase
    }

    async fn set_reader_storage_continue(&self, ts: u64) {
        self.inner.lock().unwrap().reader_continue_ts = Some(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn diff_since_respects_watermark() {
        let wal = FakeWalEngine::new(ReaderInitPhase::Phase1);
        wal.commit(vec![]);
        wal.commit(vec![]);
        let since0 = wal.get_diff_wal_entries_since(0).await;
        assert_eq!(since0.len(), 2);
        let since1 = wal.get_diff_wal_entries_since(1).await;
        assert_eq!(since1.len(), 1);
    }

    #[test]
    fn entry_round_trips_through_bytes() {
        let entry = WalEntry {
            txn_id: 7,
            commit_ts: 42,
            cmds: vec![WalCommand {
                cmd_type: WalCommandType::Checkpoint,
                payload: vec![1, 2, 3],
            }],
        };
        let decoded = WalEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded.txn_id, 7);
        assert_eq!(decoded.commit_ts, 42);
        assert_eq!(decoded.cmds[0].cmd_type, WalCommandType::Checkpoint);
    }
}
