use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::log::PartitionedLogManager;
use crate::snapshot::SlotSnapshot;
use crate::traits::PeerClient;
use crate::types::{Node, Slot};

/// Bounded worker pool that materialises pending `RemoteSnapshot`
/// placeholders. Width is `std::thread::available_parallelism()`, modelled
/// as a `tokio::sync::Semaphore` gating spawned pull tasks rather than a
/// dedicated thread pool.
pub struct PullSnapshotScheduler {
    permits: Arc<Semaphore>,
    peer_client: Arc<dyn PeerClient>,
    log_manager: Arc<PartitionedLogManager>,
    cancellation: CancellationToken,
}

impl PullSnapshotScheduler {
    pub fn new(peer_client: Arc<dyn PeerClient>, log_manager: Arc<PartitionedLogManager>) -> Self {
        let width = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            peer_client,
            log_manager,
            cancellation: CancellationToken::new(),
        }
    }

    /// Force-terminates the pool: in-flight placeholders that have not yet
    /// been resolved remain unresolved, to be re-attempted on the next
    /// leadership cycle.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }

    /// Groups `slots` by their previous holder (as given by the caller's
    /// pre-change partition-table view) and submits one task per holder.
    /// Each task issues a batched snapshot RPC against `holder` and
    /// resolves the placeholder already installed for each of its slots.
    pub fn pull_snapshots(&self, slots_by_previous_holder: HashMap<Node, Vec<Slot>>) {
        for (holder, slots) in slots_by_previous_holder {
            let permits = self.permits.clone();
            let peer_client = self.peer_client.clone();
            let log_manager = self.log_manager.clone();
            let cancellation = self.cancellation.clone();

            tokio::spawn(async move {
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return,
                    },
                    _ = cancellation.cancelled() => return,
                };

                let result = tokio::select! {
                    result = peer_client.pull_snapshot(&holder, &slots) => result,
                    _ = cancellation.cancelled() => {
                        info!(holder = holder.id, "pull-snapshot task cancelled before completion");
                        return;
                    }
                };

                match result {
                    Ok(per_slot_bytes) => {
                        for slot in &slots {
                            let Some(bytes) = per_slot_bytes.get(slot) else {
                                continue;
                            };
                            match bincode::deserialize::<SlotSnapshot>(bytes) {
                                Ok(snapshot) => {
                                    let guard_slot = log_manager.lock().await.slot_cache(*slot);
                                    if let Some(crate::snapshot::SlotCache::Remote(handle)) =
                                        guard_slot
                                    {
                                        handle.complete(snapshot);
                                    } else {
                                        // Already resolved by a competing
                                        // path; nothing to do.
                                    }
                                }
                                Err(e) => {
                                    error!(slot, error = %e, "failed to deserialize pulled snapshot");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(holder = holder.id, error = %e, "pull-snapshot RPC failed for all requested slots");
                    }
                }
            });
        }
    }
}
