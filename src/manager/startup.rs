//! Reader-side catch-up invoked by the inbound `SyncLog` handler (§4.4.10):
//! bootstrap replay with checkpoint validation, and steady-state replay.

use crate::error::ClusterError;
use crate::wal::{WalCommandType, WalEntry};
use crate::{fail_fast, pf_info};

use super::ClusterManager;

impl ClusterManager {
    /// Persists an incoming replica stream before it is applied by either
    /// `continue_startup` or `apply_synced_log_no_lock`, matching the
    /// original's `FlushLogByReplication` call ahead of its own startup/
    /// steady-state branch.
    pub async fn flush_synced_log(&self, synced_logs: &[Vec<u8>]) {
        self.env.wal.flush_log_by_replication(synced_logs).await;
    }

    /// Bootstrap catch-up. The stream must consist of zero or more
    /// `CHECKPOINT` commands followed exclusively by non-checkpoint
    /// commands; any checkpoint appearing after a non-checkpoint is fatal.
    /// Each entry replays with `is_replay=true`; afterwards storage is
    /// advanced to `last_commit_ts + 1` and marked continuable.
    pub async fn continue_startup(&self, synced_logs: &[Vec<u8>]) -> Result<(), ClusterError> {
        let mut past_checkpoints = true;
        let mut last_commit_ts = 0u64;
        for bytes in synced_logs {
            let entry = WalEntry::decode(bytes)?;
            for cmd in &entry.cmds {
                if past_checkpoints {
                    if cmd.cmd_type != WalCommandType::Checkpoint {
                        past_checkpoints = false;
                    }
                } else if cmd.cmd_type == WalCommandType::Checkpoint {
                    fail_fast!("checkpoint command found after non-checkpoint during startup replay");
                }
            }
            last_commit_ts = entry.commit_ts;
            self.env.wal.replay_wal_entry(&entry, true).await;
        }
        self.env.wal.set_reader_storage_continue(last_commit_ts + 1).await;
        pf_info!("startup catch-up replayed {} entries up to ts {}", synced_logs.len(), last_commit_ts);
        Ok(())
    }

    /// Steady-state replay: entries are decoded and replayed without the
    /// checkpoint ordering constraint. Afterwards the catalog's next
    /// transaction id, the WAL commit state, and the transaction manager's
    /// start timestamp are all advanced to the last replayed entry.
    pub async fn apply_synced_log_no_lock(&self, synced_logs: &[Vec<u8>]) -> Result<(), ClusterError> {
        let mut last_txn_id = 0u64;
        let mut last_commit_ts = 0u64;
        for bytes in synced_logs {
            let entry = WalEntry::decode(bytes)?;
            last_txn_id = entry.txn_id;
            last_commit_ts = entry.commit_ts;
            self.env.wal.replay_wal_entry(&entry, false).await;
        }
        pf_info!("replicated from leader: commit_ts {}, txn id {}", last_commit_ts, last_txn_id);
        self.env.wal.set_next_txn_id(last_txn_id).await;
        self.env.wal.update_commit_state(last_commit_ts, 0).await;
        self.env.wal.set_start_ts(last_commit_ts).await;
        Ok(())
    }
}
