use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MemberConfig;
use crate::consensus::{ElectionResponse, RoleState};
use crate::errors::{MemberError, Result};
use crate::file_puller::FilePuller;
use crate::log::PartitionedLogManager;
use crate::membership::MembershipRing;
use crate::pull_scheduler::PullSnapshotScheduler;
use crate::query::{QueryKey, QuerySessionRegistry, SharedQuerySessionRegistry};
use crate::snapshot::{Snapshot, SlotSnapshot};
use crate::traits::{LeaderForwarder, LogApplier, MetadataGroupHandle, PeerClient, SchemaRegistry, StorageEngine};
use crate::types::{LogPosition, Node, PartitionGroup, Slot};

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(150);
const HEARTBEAT_JITTER_MS: u64 = 50;

/// Adds up to `HEARTBEAT_JITTER_MS` of random skew to the heartbeat period
/// so that members started together don't all tick in lockstep.
fn jittered_heartbeat_interval() -> Duration {
    use rand::Rng;
    let jitter = rand::thread_rng().gen_range(0..=HEARTBEAT_JITTER_MS);
    HEARTBEAT_INTERVAL + Duration::from_millis(jitter)
}

/// Compound critical section: term-bump, role, leader, and the membership
/// sequence all move together under one `std::sync::Mutex`, since `addNode`
/// must bump term/role/leader atomically with inserting the new member.
struct ElectionAndMembership {
    role: RoleState,
    membership: MembershipRing,
}

/// The replica-level component: election gating, snapshot application,
/// membership insertion, request routing, and leader forwarding.
pub struct DataGroupMember {
    header: Node,
    config: MemberConfig,
    state: StdMutex<ElectionAndMembership>,
    log_manager: Arc<PartitionedLogManager>,
    storage_engine: Arc<dyn StorageEngine>,
    schema_registry: Arc<dyn SchemaRegistry>,
    log_applier: Arc<dyn LogApplier>,
    metadata_handle: Arc<dyn MetadataGroupHandle>,
    peer_client: Arc<dyn PeerClient>,
    forwarder: Arc<dyn LeaderForwarder>,
    file_puller: FilePuller,
    pull_scheduler: PullSnapshotScheduler,
    query_registry: SharedQuerySessionRegistry,
    heartbeat_cancellation: CancellationToken,
    running: AtomicBool,
}

pub struct DataGroupMemberFactory;

impl DataGroupMemberFactory {
    /// Creates a member with a fixed header and initial membership. Does
    /// not start the heartbeat task or pull-snapshot pool; call `start()`
    /// for that.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        header: Node,
        initial_members: Vec<Node>,
        config: MemberConfig,
        storage_engine: Arc<dyn StorageEngine>,
        schema_registry: Arc<dyn SchemaRegistry>,
        log_applier: Arc<dyn LogApplier>,
        metadata_handle: Arc<dyn MetadataGroupHandle>,
        peer_client: Arc<dyn PeerClient>,
        forwarder: Arc<dyn LeaderForwarder>,
    ) -> Arc<DataGroupMember> {
        let log_manager = Arc::new(PartitionedLogManager::new());
        let pull_scheduler =
            PullSnapshotScheduler::new(peer_client.clone(), log_manager.clone());
        let file_puller = FilePuller::new(
            peer_client.clone(),
            storage_engine.clone(),
            config.remote_root.clone(),
            config.connection_timeout(),
            config.chunk_size,
        );

        Arc::new(DataGroupMember {
            header,
            state: StdMutex::new(ElectionAndMembership {
                role: RoleState::new(0),
                membership: MembershipRing::from_nodes(initial_members),
            }),
            log_manager,
            storage_engine,
            schema_registry,
            log_applier,
            metadata_handle,
            peer_client,
            forwarder,
            file_puller,
            pull_scheduler,
            query_registry: Arc::new(QuerySessionRegistry::new()),
            heartbeat_cancellation: CancellationToken::new(),
            running: AtomicBool::new(false),
            config,
        })
    }
}

impl DataGroupMember {
    pub fn header(&self) -> &Node {
        &self.header
    }

    /// Starts the heartbeat task. The pull-snapshot pool needs no explicit
    /// start: it is a semaphore gating spawned tasks, live as soon as the
    /// member exists.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let cancellation = self.heartbeat_cancellation.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(jittered_heartbeat_interval()) => {
                        this.heartbeat_tick();
                    }
                    _ = cancellation.cancelled() => break,
                }
            }
        });
    }

    /// Stops the heartbeat task and force-terminates the pull-snapshot pool.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.heartbeat_cancellation.cancel();
        self.pull_scheduler.shutdown();
    }

    fn heartbeat_tick(&self) {
        // The data heartbeat loop's concrete RPC fan-out to followers is
        // delegated to the transport layer, external to this crate; this
        // tick only marks the point where that fan-out would occur.
    }

    // ---- Election gating ------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn process_election_request(
        &self,
        candidate: Node,
        candidate_term: u64,
        meta_log: LogPosition,
        data_log: LogPosition,
    ) -> ElectionResponse {
        let local_meta_log = self.local_meta_log_position().await;
        let mut guard = self.state.lock().unwrap();
        guard
            .role
            .process_election_request(candidate, candidate_term, meta_log, local_meta_log, data_log)
    }

    async fn local_meta_log_position(&self) -> LogPosition {
        match self.metadata_handle.log_position().await {
            Ok((_term, last_index, last_term)) => LogPosition::new(last_term, last_index),
            Err(_) => LogPosition::ZERO,
        }
    }

    pub fn known_leader(&self) -> Option<Node> {
        self.state.lock().unwrap().role.leader.clone()
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state.lock().unwrap().role.role, crate::types::Role::Leader)
    }

    fn all_members(&self) -> Vec<Node> {
        self.state.lock().unwrap().membership.nodes().to_vec()
    }

    // ---- Membership insertion --------------------------------------------

    /// `addNode`: inserts `node` into the ring-sorted membership, dropping
    /// the last element to preserve replication factor. Returns `true` iff
    /// the dropped element is the local node. Bumps term, clears leader,
    /// resets to Elector, atomically with the insertion.
    pub fn add_node(&self, node: Node) -> bool {
        let mut guard = self.state.lock().unwrap();

        let new_id = node.id;
        let inserted_index = match guard.membership.insert(node) {
            Some(i) => i,
            None => return false,
        };

        // A node that would become the new smallest id (and thus the
        // ring's head) is instead moved to the tail, so it is the first
        // candidate dropped on overflow rather than displacing the
        // existing head.
        if inserted_index == 0 {
            guard.membership.move_to_tail(new_id);
        }

        let r = self.config.replication_factor;
        let dropped_local = if guard.membership.len() > r {
            let dropped = guard.membership.nodes()[r].clone();
            // Truncate back down to the replication factor by dropping the
            // trailing member.
            guard.membership.truncate(r);
            dropped.id == self.header.id
        } else {
            false
        };

        guard.role.term += 1;
        guard.role.leader = None;
        guard.role.role = crate::types::Role::Elector;
        guard.role.last_heartbeat = std::time::Instant::now();

        info!(term = guard.role.term, "membership changed, forcing new election");
        dropped_local
    }

    // ---- Snapshot application ---------------------------------------------

    pub async fn apply_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut guard = self.log_manager.lock().await;
        self.apply_snapshot_locked(&mut guard, snapshot).await
    }

    async fn apply_snapshot_locked(
        &self,
        guard: &mut crate::log::LogManagerGuard<'_>,
        snapshot: Snapshot,
    ) -> Result<()> {
        match snapshot {
            Snapshot::Simple {
                schemas,
                operations,
                last_index,
                last_term,
            } => {
                self.apply_simple(&schemas, &operations).await?;
                guard.advance_to(last_term, last_index);
            }
            Snapshot::File {
                schemas,
                files,
                last_index,
                last_term,
            } => {
                self.apply_file(&schemas, files).await;
                guard.advance_to(last_term, last_index);
            }
            Snapshot::Partitioned {
                per_slot,
                last_index,
                last_term,
            } => {
                for (slot, slot_snapshot) in per_slot {
                    if !self.slot_held_by_local_header(slot).await {
                        continue;
                    }
                    self.apply_slot_snapshot(guard, slot, slot_snapshot).await?;
                }
                guard.advance_to(last_term, last_index);
            }
            Snapshot::Unrecognized => {
                warn!("dropped unrecognized snapshot variant");
            }
        }
        Ok(())
    }

    async fn slot_held_by_local_header(&self, slot: Slot) -> bool {
        match self.metadata_handle.owner_of_slot(slot).await {
            Ok(group) => group.header() == &self.header,
            Err(_) => false,
        }
    }

    async fn apply_slot_snapshot(
        &self,
        guard: &mut crate::log::LogManagerGuard<'_>,
        slot: Slot,
        slot_snapshot: SlotSnapshot,
    ) -> Result<()> {
        match &slot_snapshot {
            SlotSnapshot::Simple {
                schemas, operations, ..
            } => self.apply_simple(schemas, operations).await?,
            SlotSnapshot::File { schemas, files, .. } => {
                self.apply_file(schemas, files.clone()).await
            }
        }
        guard.install_slot(slot, slot_snapshot);
        Ok(())
    }

    async fn apply_simple(
        &self,
        schemas: &[crate::snapshot::MeasurementSchema],
        operations: &[crate::snapshot::LogEntry],
    ) -> Result<()> {
        for schema in schemas {
            self.schema_registry.register(schema).await?;
        }
        for entry in operations {
            // Apply failures are logged and skipped: the remainder of the
            // snapshot still applies.
            if let Err(e) = self.log_applier.apply_entry(entry).await {
                error!(index = entry.index, error = %e, "apply failed, skipping entry");
            }
        }
        Ok(())
    }

    async fn apply_file(
        &self,
        schemas: &[crate::snapshot::MeasurementSchema],
        files: Vec<crate::snapshot::RemoteFileRef>,
    ) {
        for schema in schemas {
            if let Err(e) = self.schema_registry.register(schema).await {
                error!(error = %e, "schema registration failed");
            }
        }
        for file_ref in files {
            if file_ref.local {
                continue;
            }
            let Some(suffix) = file_ref.storage_group_and_name() else {
                continue;
            };
            match self.storage_engine.has_file(suffix).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "has_file check failed");
                    continue;
                }
            }
            let source_group = match self.metadata_handle.owner_of_slot(0).await {
                Ok(group) => group,
                Err(_) => PartitionGroup::new(vec![file_ref.source.clone()]),
            };
            if let Err(e) = self.file_puller.load_remote_file(file_ref, &source_group).await {
                warn!(error = %e, "remote file load failed, left un-pulled for retry");
            }
        }
    }

    // ---- pullSnapshot RPC -------------------------------------------------

    pub async fn pull_snapshot(&self, slots: Vec<Slot>) -> Result<HashMap<Slot, Vec<u8>>> {
        if !self.is_leader() {
            return match self.known_leader() {
                Some(leader) => self.forwarder.forward_pull_snapshot(&leader, &slots).await,
                None => Err(MemberError::LeaderUnknown {
                    header: self.header.clone(),
                    members: self.all_members(),
                }),
            };
        }

        let guard = self.log_manager.lock().await;
        let snapshot = guard.take_snapshot(&slots);
        let Snapshot::Partitioned { per_slot, .. } = snapshot else {
            unreachable!("take_snapshot always returns Partitioned");
        };

        let mut result = HashMap::new();
        for (slot, slot_snapshot) in per_slot {
            let bytes = bincode::serialize(&slot_snapshot)
                .map_err(|e| MemberError::DeserializeFailure(e.to_string()))?;
            result.insert(slot, bytes);
        }
        Ok(result)
    }

    /// Returns the raw per-slot snapshots held locally for `slots`,
    /// regardless of leader/follower role — an introspection seam used by
    /// tests that need to check what the slot-held filter actually
    /// materialised without going through the leader-only `pullSnapshot`
    /// RPC.
    pub async fn held_slot_snapshots(&self, slots: &[Slot]) -> HashMap<Slot, SlotSnapshot> {
        let guard = self.log_manager.lock().await;
        let snapshot = guard.take_snapshot(slots);
        let Snapshot::Partitioned { per_slot, .. } = snapshot else {
            unreachable!("take_snapshot always returns Partitioned");
        };
        per_slot.into_iter().collect()
    }

    // ---- Pull-snapshot scheduling ------------------------------------------

    /// Invoked after `addNode` migrates slots to the local header: groups
    /// `slots` by previous holder and installs a remote placeholder for
    /// each before dispatching the batched pull.
    pub async fn pull_snapshots(&self, slots_by_previous_holder: HashMap<Node, Vec<Slot>>) {
        {
            let mut guard = self.log_manager.lock().await;
            for slots in slots_by_previous_holder.values() {
                for &slot in slots {
                    guard.install_remote_placeholder(slot);
                }
            }
        }
        self.pull_scheduler.pull_snapshots(slots_by_previous_holder);
    }

    // ---- Data query path ---------------------------------------------------

    async fn sync_leader(&self) -> Result<()> {
        if self.is_leader() || self.known_leader().is_some() {
            Ok(())
        } else {
            Err(MemberError::LeaderUnknown {
                header: self.header.clone(),
                members: self.all_members(),
            })
        }
    }

    pub async fn query_single_series(
        &self,
        path: &str,
        filter: Option<&[u8]>,
        requester: Node,
        query_id: i64,
        push_down_unseq: bool,
    ) -> Result<u64> {
        self.sync_leader().await?;
        let reader = self
            .storage_engine
            .open_series_reader(path, filter, push_down_unseq)
            .await?;
        let key = QueryKey { requester, query_id };
        Ok(self.query_registry.register_reader(key, reader).await)
    }

    pub async fn fetch_single_series(&self, reader_id: u64, fetch_size: usize) -> Result<Vec<u8>> {
        let batch = self
            .query_registry
            .fetch(reader_id, fetch_size)
            .await
            .ok_or(MemberError::ReaderNotFound(reader_id))?;

        let mut out = Vec::new();
        if let Some((_, first_value)) = batch.first() {
            out.push(first_value.type_ordinal());
        }
        for (time, value) in &batch {
            out.extend_from_slice(&time.to_be_bytes());
            encode_value(value, &mut out);
        }
        Ok(out)
    }

    pub async fn pull_time_series_schema(&self, prefix: &str) -> Result<Vec<u8>> {
        if self.sync_leader().await.is_err() {
            if let Some(leader) = self.known_leader() {
                return self
                    .forwarder
                    .forward_pull_time_series_schema(&leader, prefix)
                    .await;
            }
            return Err(MemberError::LeaderUnknown {
                header: self.header.clone(),
                members: self.all_members(),
            });
        }

        let schemas = self.schema_registry.matching(prefix).await?;
        let mut out = Vec::new();
        out.extend_from_slice(&(schemas.len() as u32).to_be_bytes());
        for schema in &schemas {
            out.extend_from_slice(schema.path.as_bytes());
            out.push(0);
            out.extend_from_slice(schema.encoding.as_bytes());
            out.push(0);
        }
        Ok(out)
    }

    pub async fn execute_non_query(&self, plan: &[u8]) -> Result<()> {
        if self.is_leader() {
            return self.storage_engine.execute_non_query(plan).await;
        }
        match self.known_leader() {
            Some(leader) => self.forwarder.forward_execute_non_query(&leader, plan).await,
            None => Err(MemberError::LeaderUnknown {
                header: self.header.clone(),
                members: self.all_members(),
            }),
        }
    }

    pub async fn get_all_paths(&self, prefix: &str) -> Result<Vec<String>> {
        self.schema_registry.matching_paths(prefix).await
    }

    pub async fn end_query(&self, requester: Node, query_id: i64) {
        self.query_registry
            .end_query(&QueryKey { requester, query_id })
            .await;
    }
}

fn encode_value(value: &crate::query::Value, out: &mut Vec<u8>) {
    use crate::query::Value;
    match value {
        Value::Bool(b) => out.push(*b as u8),
        Value::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Text(s) => {
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        InMemoryLogApplier, InMemoryMetadataGroupHandle, InMemoryPeerClient, InMemorySchemaRegistry,
        InMemoryStorageEngine, RecordingLeaderForwarder,
    };

    fn config() -> MemberConfig {
        MemberConfig {
            local_address: "local".into(),
            local_meta_port: 9003,
            local_node_id: 40,
            replication_factor: 4,
            slot_count: 16,
            remote_root: std::env::temp_dir().join("dgm-test-remote"),
            connection_timeout_ms: 5_000,
            chunk_size: 65536,
        }
    }

    fn member(header_id: u64, initial: Vec<u64>) -> Arc<DataGroupMember> {
        let header = Node::new("local", 9000, header_id);
        let members = initial
            .into_iter()
            .map(|id| Node::new(format!("h{id}"), 9000, id))
            .collect();
        DataGroupMemberFactory::create(
            header,
            members,
            config(),
            Arc::new(InMemoryStorageEngine::new()),
            Arc::new(InMemorySchemaRegistry::new()),
            Arc::new(InMemoryLogApplier::new()),
            Arc::new(InMemoryMetadataGroupHandle::new()),
            Arc::new(InMemoryPeerClient::new()),
            Arc::new(RecordingLeaderForwarder::new()),
        )
    }

    #[test]
    fn add_node_with_wrap_evicts_local() {
        let m = member(40, vec![10, 20, 30, 40]);
        let evicted = m.add_node(Node::new("h35", 9000, 35));
        assert!(evicted);
        let ids: Vec<u64> = m.all_members().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![10, 20, 30, 35]);
    }

    #[tokio::test]
    async fn pull_snapshot_as_follower_forwards() {
        let m = member(1, vec![1, 2, 3]);
        // Force follower role with a known leader by granting an election.
        let leader = Node::new("leader", 9000, 2);
        m.process_election_request(leader.clone(), 1, LogPosition::ZERO, LogPosition::ZERO)
            .await;
        assert!(!m.is_leader());
        assert_eq!(m.known_leader(), Some(leader));

        let result = m.pull_snapshot(vec![1, 2, 3]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn fetch_unknown_reader_errors() {
        let m = member(1, vec![1]);
        let err = m.fetch_single_series(999, 10).await.unwrap_err();
        assert!(matches!(err, MemberError::ReaderNotFound(999)));
    }
}
