//! Log replication: appending to the pending batch (PrepareLogs) and fanning
//! it out to followers synchronously / learners asynchronously (SyncLogs),
//! per §4.4.8.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ClusterError;
use crate::node::{NodeRole, NodeStatus};
use crate::peer::PeerClient;
use crate::tasks::{new_task, SyncLogRequest, TaskReply, TaskRequest};
use crate::pf_warn;

use super::ClusterManager;

type ReaderSnapshot = Vec<(String, Arc<dyn PeerClient>)>;

impl ClusterManager {
    /// Leader-only. Appends `entry` to the pending replication batch.
    pub async fn prepare_logs(&self, entry: Vec<u8>) {
        let mut state = self.state.lock().await;
        state.require_role(NodeRole::Leader);
        state.logs_to_sync.push(entry);
    }

    /// Leader-only: rescans the follower/learner set each outer iteration
    /// and sends every still-unsent reader the full pending batch —
    /// synchronously to followers, fire-and-forget to learners — until the
    /// whole snapshot has been sent, then clears `logs_to_sync`.
    pub async fn sync_logs(&self) -> Result<(), ClusterError> {
        let entries = {
            let mut state = self.state.lock().await;
            state.require_role(NodeRole::Leader);
            std::mem::take(&mut state.logs_to_sync)
        };

        let mut sent_nodes = std::collections::HashSet::new();
        loop {
            let (followers, learners) = self.get_readers_info().await?;

            for (name, client) in &followers {
                if sent_nodes.contains(name) {
                    continue;
                }
                match self.send_logs(name, client, entries.clone(), false, false).await {
                    Ok(()) => {
                        sent_nodes.insert(name.clone());
                    }
                    Err(e) => pf_warn!("log sync to follower {} failed, will retry: {}", name, e),
                }
            }
            for (name, client) in &learners {
                if sent_nodes.contains(name) {
                    continue;
                }
                let (task, _wait) = new_task(TaskRequest::SyncLog(SyncLogRequest {
                    log_entries: entries.clone(),
                    on_register: false,
                    on_startup: false,
                }));
                match client.send(task) {
                    Ok(()) => {
                        sent_nodes.insert(name.clone());
                    }
                    Err(e) => pf_warn!("log send to learner {} failed, will retry: {}", name, e),
                }
            }

            if sent_nodes.len() == followers.len() + learners.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Leader-only. Followers and learners with `NodeStatus::Alive`, paired
    /// with their `PeerClient`s.
    pub(super) async fn get_readers_info(&self) -> Result<(ReaderSnapshot, ReaderSnapshot), ClusterError> {
        let state = self.state.lock().await;
        state.require_role(NodeRole::Leader);
        let mut followers = Vec::new();
        let mut learners = Vec::new();
        for (name, node) in state.other_node_map.iter() {
            if node.node_status != NodeStatus::Alive {
                continue;
            }
            let Some(client) = state.reader_client_map.get(name) else {
                continue;
            };
            match node.node_role {
                NodeRole::Follower => followers.push((name.clone(), Arc::clone(client))),
                NodeRole::Learner => learners.push((name.clone(), Arc::clone(client))),
                _ => {}
            }
        }
        Ok((followers, learners))
    }

    /// Sends `entries` to `name` as a single `SyncLog` batch and waits for
    /// acknowledgement. Used both for registration catch-up and for
    /// follower fan-out; learners use fire-and-forget enqueue instead (see
    /// [`Self::sync_logs`]).
    pub(super) async fn send_logs(
        &self,
        name: &str,
        client: &Arc<dyn PeerClient>,
        entries: Vec<Vec<u8>>,
        on_register: bool,
        on_startup: bool,
    ) -> Result<(), ClusterError> {
        let (task, wait) = new_task(TaskRequest::SyncLog(SyncLogRequest {
            log_entries: entries,
            on_register,
            on_startup,
        }));
        client.send(task)?;
        match wait.wait().await? {
            TaskReply::SyncLog(_) => Ok(()),
            _ => Err(ClusterError::unexpected(format!(
                "unexpected reply type for SyncLog task to {name}"
            ))),
        }
    }
}
