use thiserror::Error;

use crate::types::Node;

/// Crate-wide error type surfaced across the RPC surface.
///
/// Failures that are always recovered locally (apply-failure-and-skip,
/// transfer-failure-and-failover) are not represented here: they are logged
/// at the point of recovery via `tracing` rather than propagated. Only the
/// variants that must reach an RPC caller verbatim live in this enum.
#[derive(Debug, Error)]
pub enum MemberError {
    /// No leader is currently known. Carries the full membership so the
    /// caller can retry against another member.
    #[error("leader unknown for group headed by {header:?}; members: {members:?}")]
    LeaderUnknown { header: Node, members: Vec<Node> },

    /// `fetchSingleSeries` referenced a reader id that does not exist (never
    /// registered, or already released by `endQuery`).
    #[error("no reader registered with id {0}")]
    ReaderNotFound(u64),

    /// The metadata-group collaborator failed to answer a partition-table or
    /// path lookup.
    #[error("metadata lookup failed: {0}")]
    MetadataError(String),

    /// The storage engine rejected an operation (ingestion, read, write).
    #[error("storage engine error: {0}")]
    StorageEngineError(String),

    /// A remote-file pull exhausted every member of the source group.
    #[error("failed to transfer {path} from any member of the source group: {reason}")]
    TransferFailure { path: String, reason: String },

    /// The storage engine rejected a pulled file during ingestion.
    #[error("ingestion of {path} failed: {reason}")]
    IngestFailure { path: String, reason: String },

    /// An incoming snapshot or RPC payload did not deserialize.
    #[error("failed to deserialize payload: {0}")]
    DeserializeFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemberError>;
