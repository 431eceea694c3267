use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::{MemberError, Result};
use crate::snapshot::RemoteFileRef;
use crate::traits::{PeerClient, StorageEngine};
use crate::types::{Node, PartitionGroup};

/// Read-stream chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub struct FilePuller {
    peer_client: Arc<dyn PeerClient>,
    storage_engine: Arc<dyn StorageEngine>,
    remote_root: PathBuf,
    connection_timeout: Duration,
    chunk_size: usize,
}

impl FilePuller {
    pub fn new(
        peer_client: Arc<dyn PeerClient>,
        storage_engine: Arc<dyn StorageEngine>,
        remote_root: PathBuf,
        connection_timeout: Duration,
        chunk_size: usize,
    ) -> Self {
        Self {
            peer_client,
            storage_engine,
            remote_root,
            connection_timeout,
            chunk_size,
        }
    }

    fn staging_path(&self, node_id: u64, storage_group_and_name: &str) -> PathBuf {
        self.remote_root
            .join(node_id.to_string())
            .join(storage_group_and_name)
    }

    /// Attempts each node of `source_group` in turn until one transfer
    /// succeeds and ingestion completes. Returns `Ok(())` only after
    /// successful ingestion; exhaustion of the group is logged and the ref
    /// is left un-pulled for the next snapshot apply to retry.
    pub async fn load_remote_file(
        &self,
        mut remote_ref: RemoteFileRef,
        source_group: &PartitionGroup,
    ) -> Result<RemoteFileRef> {
        let suffix = remote_ref
            .storage_group_and_name()
            .ok_or_else(|| MemberError::DeserializeFailure("malformed remote path".into()))?
            .to_string();

        if self.storage_engine.has_file(&suffix).await? {
            remote_ref.local = true;
            return Ok(remote_ref);
        }

        let mut last_err = None;
        for node in source_group.members() {
            let dest = self.staging_path(node.id, &suffix);
            match self.try_pull_from(node, &remote_ref, &dest, source_group.header()).await {
                Ok(()) => {
                    remote_ref.remote_path = dest.to_string_lossy().into_owned();
                    remote_ref.local = true;
                    return Ok(remote_ref);
                }
                Err(e) => {
                    warn!(node = node.id, error = %e, "remote file pull failed, trying next member");
                    last_err = Some(e);
                }
            }
        }

        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "source group empty".to_string());
        Err(MemberError::TransferFailure {
            path: remote_ref.remote_path.clone(),
            reason,
        })
    }

    async fn try_pull_from(
        &self,
        node: &Node,
        remote_ref: &RemoteFileRef,
        dest: &Path,
        group_header: &Node,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        self.pull_remote_file(node, &remote_ref.remote_path, dest, group_header)
            .await?;

        // Digest verification is a defined but currently-permissive hook.
        self.verify_digest(dest, &remote_ref.md5).await?;

        if remote_ref.has_modifications {
            if let Some(mods_path) = &remote_ref.modifications_path {
                let mods_dest = PathBuf::from(format!("{}.mods", dest.display()));
                self.pull_remote_file(node, mods_path, &mods_dest, group_header)
                    .await?;
            }
        }

        self.storage_engine
            .ingest_file(&dest.to_string_lossy())
            .await
            .map_err(|e| MemberError::IngestFailure {
                path: dest.to_string_lossy().into_owned(),
                reason: e.to_string(),
            })?;

        // The storage engine may relocate `dest` during ingestion; the
        // `.mods` sidecar is left staged beside the pre-ingestion path since
        // the engine trait gives no hook to follow the relocation.
        Ok(())
    }

    /// `verify_digest` is intentionally permissive: until real content
    /// verification is wired up, transfer integrity relies on the
    /// transport layer.
    async fn verify_digest(&self, _dest: &Path, _expected_md5: &str) -> Result<()> {
        Ok(())
    }

    /// Chunked transfer protocol: loop reading fixed-size chunks from
    /// `node` at increasing offsets until an empty/absent response signals
    /// end-of-file.
    pub async fn pull_remote_file(
        &self,
        node: &Node,
        remote_path: &str,
        dest: &Path,
        group_header: &Node,
    ) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dest)
            .await?;

        let mut offset: u64 = 0;
        loop {
            let chunk = match tokio::time::timeout(
                self.connection_timeout,
                self.peer_client
                    .read_file(node, remote_path, offset, self.chunk_size, group_header),
            )
            .await
            {
                Ok(Ok(chunk)) => chunk,
                Ok(Err(e)) => {
                    return Err(e);
                }
                Err(_) => {
                    drop(file);
                    let _ = fs::remove_file(dest).await;
                    return Err(MemberError::TransferFailure {
                        path: remote_path.to_string(),
                        reason: "timed out waiting for chunk".to_string(),
                    });
                }
            };

            match chunk.map(Bytes::from) {
                None => break,
                Some(bytes) if bytes.is_empty() => break,
                Some(bytes) => {
                    file.write_all(&bytes).await?;
                    // Advance by bytes actually written, not the backing
                    // buffer's allocated length.
                    offset += bytes.len() as u64;
                    debug!(node = node.id, offset, "pulled chunk");
                }
            }
        }

        file.flush().await?;
        Ok(())
    }
}
