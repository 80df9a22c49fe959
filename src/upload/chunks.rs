//! Chunk persistence for in-progress uploads.
//!
//! Each chunk is first written to a uniquely named `.part` file inside the
//! session directory and then renamed onto `chunk_<index>`. Rename within a
//! directory is atomic, so a concurrent listing sees either the previous
//! chunk for that index or the new one, never a half-written file. Listings
//! only consider `chunk_*` names, which the temp files never match.

use super::{validate_token, SessionLedger};
use crate::error::{DocConvError, Result};
use crate::order;
use crate::scratch::ScratchSpace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub(crate) const CHUNK_PREFIX: &str = "chunk_";

/// One chunk on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub index: String,
    pub path: PathBuf,
}

/// Stores uploaded chunks under `upload_chunks/<uploadId>/`.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    scratch: ScratchSpace,
    ledger: Arc<SessionLedger>,
}

impl ChunkStore {
    pub fn new(scratch: ScratchSpace, ledger: Arc<SessionLedger>) -> Self {
        Self { scratch, ledger }
    }

    /// Persist `bytes` as chunk `index` of `upload_id`.
    ///
    /// A repeated write for the same index replaces the earlier chunk. Once
    /// the call returns `Ok`, a later `assemble` of the session includes it.
    pub async fn put_chunk(&self, upload_id: &str, index: &str, bytes: &[u8]) -> Result<PathBuf> {
        validate_token("uploadId", upload_id)?;
        validate_token("index", index)?;
        // Held until the rename lands; assembly waits for it.
        let _write = self.ledger.begin_write(upload_id)?;

        let dir = self.scratch.session_dir(upload_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DocConvError::storage(&dir, e))?;

        let final_path = dir.join(format!("{CHUNK_PREFIX}{index}"));
        let tmp_path = dir.join(format!(".{index}.{}.part", uuid::Uuid::new_v4().simple()));

        if let Err(e) = write_file(&tmp_path, bytes).await {
            discard(&tmp_path).await;
            return Err(DocConvError::storage(&tmp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            discard(&tmp_path).await;
            return Err(DocConvError::storage(&final_path, e));
        }

        debug!(
            "Stored chunk {} of {} ({} bytes)",
            index,
            upload_id,
            bytes.len()
        );
        Ok(final_path)
    }

    /// List the chunks of `upload_id` in assembly order.
    ///
    /// A session that was never written to has no chunks.
    pub async fn list_chunks(&self, upload_id: &str) -> Result<Vec<StoredChunk>> {
        validate_token("uploadId", upload_id)?;
        list_chunk_dir(&self.scratch.session_dir(upload_id)).await
    }
}

pub(crate) async fn list_chunk_dir(dir: &Path) -> Result<Vec<StoredChunk>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DocConvError::storage(dir, e)),
    };

    let mut chunks = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DocConvError::storage(dir, e))?
    {
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(|n| n.strip_prefix(CHUNK_PREFIX)) else {
            continue;
        };
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file {
            chunks.push(StoredChunk {
                index: index.to_string(),
                path: entry.path(),
            });
        }
    }

    order::sort_by_index(&mut chunks, |c| c.index.as_str());
    Ok(chunks)
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial chunk {}: {}", path.display(), e);
        }
    }
}
