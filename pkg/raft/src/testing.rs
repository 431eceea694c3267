//! In-memory test doubles for the external-collaborator traits. These
//! exist purely to back the scenario tests without a real storage engine,
//! schema registry, metadata group, or peer transport.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::Result;
use crate::query::{SeriesReader, Value};
use crate::snapshot::{LogEntry, MeasurementSchema};
use crate::traits::{LeaderForwarder, LogApplier, MetadataGroupHandle, PeerClient, SchemaRegistry, StorageEngine};
use crate::types::{Node, PartitionGroup, Slot};

#[derive(Default)]
pub struct InMemoryStorageEngine {
    non_queries: Mutex<Vec<Vec<u8>>>,
    files: Mutex<HashSet<String>>,
    ingested: Mutex<Vec<String>>,
}

impl InMemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_file(&self, storage_group_and_name: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(storage_group_and_name.to_string());
    }

    pub fn non_query_count(&self) -> usize {
        self.non_queries.lock().unwrap().len()
    }

    pub fn ingested_paths(&self) -> Vec<String> {
        self.ingested.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageEngine for InMemoryStorageEngine {
    async fn ingest_file(&self, staged_path: &str) -> Result<()> {
        self.ingested.lock().unwrap().push(staged_path.to_string());
        Ok(())
    }

    async fn has_file(&self, storage_group_and_name: &str) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains(storage_group_and_name))
    }

    async fn open_series_reader(
        &self,
        _path: &str,
        _filter: Option<&[u8]>,
        _push_down_unseq: bool,
    ) -> Result<Box<dyn SeriesReader>> {
        Ok(Box::new(EmptySeriesReader))
    }

    async fn execute_non_query(&self, payload: &[u8]) -> Result<()> {
        self.non_queries.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

/// Records every entry handed to it in order. Used to assert that snapshot
/// application drives entries through the log applier, not the storage
/// engine directly.
#[derive(Default)]
pub struct InMemoryLogApplier {
    applied: Mutex<Vec<Vec<u8>>>,
}

impl InMemoryLogApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_payloads(&self) -> Vec<Vec<u8>> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogApplier for InMemoryLogApplier {
    async fn apply_entry(&self, entry: &LogEntry) -> Result<()> {
        self.applied.lock().unwrap().push(entry.payload.clone());
        Ok(())
    }
}

struct EmptySeriesReader;

#[async_trait]
impl SeriesReader for EmptySeriesReader {
    async fn next_batch(&mut self, _max: usize) -> Vec<(i64, Value)> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct InMemorySchemaRegistry {
    schemas: Mutex<Vec<MeasurementSchema>>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register(&self, schema: &MeasurementSchema) -> Result<()> {
        self.schemas.lock().unwrap().push(schema.clone());
        Ok(())
    }

    async fn matching(&self, prefix: &str) -> Result<Vec<MeasurementSchema>> {
        Ok(self
            .schemas
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn matching_paths(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .schemas
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path.starts_with(prefix))
            .map(|s| s.path.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMetadataGroupHandle {
    slot_owners: Mutex<HashMap<Slot, PartitionGroup>>,
    log_position: Mutex<(u64, u64, u64)>,
}

impl InMemoryMetadataGroupHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_owner(&self, slot: Slot, group: PartitionGroup) {
        self.slot_owners.lock().unwrap().insert(slot, group);
    }

    pub fn set_log_position(&self, term: u64, last_index: u64, last_term: u64) {
        *self.log_position.lock().unwrap() = (term, last_index, last_term);
    }
}

#[async_trait]
impl MetadataGroupHandle for InMemoryMetadataGroupHandle {
    async fn owner_of_slot(&self, slot: Slot) -> Result<PartitionGroup> {
        self.slot_owners
            .lock()
            .unwrap()
            .get(&slot)
            .cloned()
            .ok_or_else(|| {
                crate::errors::MemberError::MetadataError(format!("no owner for slot {slot}"))
            })
    }

    async fn slots_held_by(&self, header: &Node) -> Result<Vec<Slot>> {
        Ok(self
            .slot_owners
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, g)| g.header() == header)
            .map(|(slot, _)| *slot)
            .collect())
    }

    async fn log_position(&self) -> Result<(u64, u64, u64)> {
        Ok(*self.log_position.lock().unwrap())
    }
}

#[derive(Default)]
pub struct InMemoryPeerClient {
    files: Mutex<HashMap<(NodeKey, String), Vec<u8>>>,
    snapshots: Mutex<HashMap<NodeKey, HashMap<Slot, Vec<u8>>>>,
}

type NodeKey = u64;

impl InMemoryPeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_file(&self, node: &Node, path: &str, content: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert((node.id, path.to_string()), content);
    }

    pub fn seed_snapshot(&self, node: &Node, slot: Slot, bytes: Vec<u8>) {
        self.snapshots
            .lock()
            .unwrap()
            .entry(node.id)
            .or_default()
            .insert(slot, bytes);
    }
}

#[async_trait]
impl PeerClient for InMemoryPeerClient {
    async fn read_file(
        &self,
        node: &Node,
        path: &str,
        offset: u64,
        len: usize,
        _group_header: &Node,
    ) -> Result<Option<Vec<u8>>> {
        let files = self.files.lock().unwrap();
        let Some(content) = files.get(&(node.id, path.to_string())) else {
            return Ok(None);
        };
        let offset = offset as usize;
        if offset >= content.len() {
            return Ok(None);
        }
        let end = (offset + len).min(content.len());
        Ok(Some(content[offset..end].to_vec()))
    }

    async fn pull_snapshot(
        &self,
        node: &Node,
        slots: &[Slot],
    ) -> Result<HashMap<Slot, Vec<u8>>> {
        let snapshots = self.snapshots.lock().unwrap();
        let Some(by_slot) = snapshots.get(&node.id) else {
            return Ok(HashMap::new());
        };
        Ok(slots
            .iter()
            .filter_map(|s| by_slot.get(s).map(|bytes| (*s, bytes.clone())))
            .collect())
    }
}

/// A forwarder double that never actually calls out; it just records what
/// it was asked to forward and returns canned empty results. Good enough
/// for testing that forwarding was *attempted* rather than served locally.
#[derive(Default)]
pub struct RecordingLeaderForwarder {
    pub forwarded_non_queries: Mutex<Vec<Vec<u8>>>,
}

impl RecordingLeaderForwarder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaderForwarder for RecordingLeaderForwarder {
    async fn forward_pull_snapshot(
        &self,
        _leader: &Node,
        _slots: &[Slot],
    ) -> Result<HashMap<Slot, Vec<u8>>> {
        Ok(HashMap::new())
    }

    async fn forward_pull_time_series_schema(&self, _leader: &Node, _prefix: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn forward_execute_non_query(&self, _leader: &Node, plan: &[u8]) -> Result<()> {
        self.forwarded_non_queries.lock().unwrap().push(plan.to_vec());
        Ok(())
    }
}
