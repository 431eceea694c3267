use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{MemberError, Result};
use crate::file_puller::DEFAULT_CHUNK_SIZE;
use crate::types::NodeId;

/// Runtime configuration for a single Data Group Member. Loaded from a
/// TOML file whose path is given on the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberConfig {
    pub local_address: String,
    pub local_meta_port: u16,
    pub local_node_id: NodeId,

    /// Fixed replication factor R.
    pub replication_factor: usize,

    /// Number of slots S partitioning the key space.
    pub slot_count: u32,

    /// Root directory under which pulled files are staged before
    /// ingestion: `{remote_root}/{sourceNodeId}/{storageGroup}/{fileName}`.
    pub remote_root: PathBuf,

    /// Timeout, in milliseconds, for a single chunked-read RPC.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Chunk size override in bytes; defaults to 64 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_connection_timeout_ms() -> u64 {
    20_000
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl MemberConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| MemberError::DeserializeFailure(e.to_string()))
    }

    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let raw = r#"
            local_address = "10.0.0.1"
            local_meta_port = 9003
            local_node_id = 1
            replication_factor = 3
            slot_count = 16384
            remote_root = "/var/lib/member/remote"
        "#;
        let cfg = MemberConfig::from_toml_str(raw).unwrap();
        assert_eq!(cfg.connection_timeout_ms, 20_000);
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
