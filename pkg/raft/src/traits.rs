use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::Result;
use crate::query::SeriesReader;
use crate::snapshot::{LogEntry, MeasurementSchema, RemoteFileRef};
use crate::types::{Node, PartitionGroup, Slot};

/// The local storage engine, external to this crate: modelled here purely
/// by the operations the core invokes on it.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Ingests a file staged at `staged_path` into permanent storage. On
    /// success the engine may relocate the file; the caller only needs to
    /// know whether ingestion succeeded.
    async fn ingest_file(&self, staged_path: &str) -> Result<()>;

    /// True iff a file of this `{storageGroup}/{fileName}` suffix is
    /// already present in any registered sequence/unsequence directory.
    async fn has_file(&self, storage_group_and_name: &str) -> Result<bool>;

    /// Opens a point reader for `path`, combining locally-visible data with
    /// an optional encoded time filter and the unsequenced-push-down flag.
    async fn open_series_reader(
        &self,
        path: &str,
        filter: Option<&[u8]>,
        push_down_unseq: bool,
    ) -> Result<Box<dyn SeriesReader>>;

    /// Drives an already-decided, definite non-query plan (inserts, schema
    /// changes, …) when running as leader.
    async fn execute_non_query(&self, plan: &[u8]) -> Result<()>;
}

/// The schema registry, external to this crate.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn register(&self, schema: &MeasurementSchema) -> Result<()>;

    /// Schemas whose path starts with `prefix`, in the registry's own
    /// canonical encoding.
    async fn matching(&self, prefix: &str) -> Result<Vec<MeasurementSchema>>;

    /// Paths matching `prefix`, independent of schema content.
    async fn matching_paths(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read-only capability borrowed from the metadata-group member: partition
/// table lookups and metadata-group log position, used by election gating
/// and slot-ownership checks. The Data Group Member never owns this; it is
/// injected at construction.
#[async_trait]
pub trait MetadataGroupHandle: Send + Sync {
    /// The group that currently owns `slot`, per the partition table's
    /// current view.
    async fn owner_of_slot(&self, slot: Slot) -> Result<PartitionGroup>;

    /// All slots currently held by `header`.
    async fn slots_held_by(&self, header: &Node) -> Result<Vec<Slot>>;

    /// The metadata-group log position used by `processElectionRequest`.
    async fn log_position(&self) -> Result<(u64, u64, u64)>; // (term, lastIndex, lastTerm)
}

/// Applies committed log operations to local storage in order. The log
/// applier, not `StorageEngine` directly, is what snapshot application
/// drives entry-by-entry so that apply-failure-and-skip (per entry) can be
/// exercised without a real storage engine.
#[async_trait]
pub trait LogApplier: Send + Sync {
    async fn apply_entry(&self, entry: &LogEntry) -> Result<()>;
}

/// Peer-to-peer RPC surface the member calls on other nodes: remote-file
/// chunked reads and batched snapshot pulls. Named distinctly from the
/// member's own inbound RPC surface because it is the outbound half.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Reads up to `len` bytes of `path` on `node` starting at `offset`.
    /// Returns `Ok(None)` at end-of-file (empty/absent response).
    async fn read_file(
        &self,
        node: &Node,
        path: &str,
        offset: u64,
        len: usize,
        group_header: &Node,
    ) -> Result<Option<Vec<u8>>>;

    /// Requests `slots`' current per-slot snapshots from `node`, batched
    /// into one call per source holder.
    async fn pull_snapshot(
        &self,
        node: &Node,
        slots: &[Slot],
    ) -> Result<HashMap<Slot, Vec<u8>>>;
}

/// Leader-forwarding transport: whenever a non-idempotent operation arrives
/// at a non-leader, the member relays it to the known leader and returns
/// the leader's result verbatim. Kept distinct from `PeerClient` (the
/// snapshot/file transfer transport) because forwarding addresses the
/// member's own inbound RPC surface, not peer-to-peer data transfer.
#[async_trait]
pub trait LeaderForwarder: Send + Sync {
    async fn forward_pull_snapshot(
        &self,
        leader: &Node,
        slots: &[Slot],
    ) -> Result<HashMap<Slot, Vec<u8>>>;

    async fn forward_pull_time_series_schema(&self, leader: &Node, prefix: &str) -> Result<Vec<u8>>;

    async fn forward_execute_non_query(&self, leader: &Node, plan: &[u8]) -> Result<()>;
}
