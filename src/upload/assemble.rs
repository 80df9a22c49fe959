//! One-shot assembly of a chunk session into a registered artifact.
//!
//! ## State machine
//!
//! ```text
//! Pending ──begin──▶ Assembling ──write ok──▶ Assembled ──chunks removed──▶ Purged
//!    ▲                   │
//!    └──── abort ◀───────┘  (no chunks / I/O failure)
//! ```
//!
//! Any `assemble` that finds the session outside `Pending` fails with
//! [`DocConvError::AlreadyAssembled`] instead of re-reading a directory that
//! is being (or has been) deleted. `begin` shuts out new chunk writes first
//! and then waits for the ones already in flight, so the listing taken after
//! it returns holds every chunk whose `put_chunk` succeeded.

use super::chunks::list_chunk_dir;
use super::{validate_token, SessionLedger, SessionState};
use crate::error::{DocConvError, Result};
use crate::registry::ArtifactRegistry;
use crate::scratch::{self, ScratchSpace};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Fallback name when the caller's filename sanitises to nothing.
const DEFAULT_FILENAME: &str = "upload.bin";

/// Longest filename kept after sanitising.
const MAX_FILENAME_LEN: usize = 200;

/// The result of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledArtifact {
    pub registry_key: String,
    pub path: PathBuf,
    pub size: u64,
    pub chunk_count: usize,
}

/// Concatenates staged chunks into `assembled_uploads/` and registers them.
#[derive(Debug, Clone)]
pub struct Assembler {
    scratch: ScratchSpace,
    ledger: Arc<SessionLedger>,
    registry: Arc<ArtifactRegistry>,
}

impl Assembler {
    pub fn new(
        scratch: ScratchSpace,
        ledger: Arc<SessionLedger>,
        registry: Arc<ArtifactRegistry>,
    ) -> Self {
        Self {
            scratch,
            ledger,
            registry,
        }
    }

    /// Assemble `upload_id` into one file named after `filename`.
    ///
    /// Must be called once per session; later calls are rejected.
    pub async fn assemble(&self, upload_id: &str, filename: &str) -> Result<AssembledArtifact> {
        validate_token("uploadId", upload_id)?;
        let filename = sanitize_filename(filename);

        // Dropping the claim on error (or cancellation) returns the session
        // to Pending so the client can retry.
        let claim = self.ledger.begin(upload_id).await?;
        let artifact = self.assemble_claimed(upload_id, &filename).await?;
        claim.complete();
        Ok(artifact)
    }

    async fn assemble_claimed(&self, upload_id: &str, filename: &str) -> Result<AssembledArtifact> {
        let session_dir = self.scratch.session_dir(upload_id);
        let chunks = list_chunk_dir(&session_dir).await?;
        if chunks.is_empty() {
            return Err(DocConvError::NoChunks {
                upload_id: upload_id.to_string(),
            });
        }

        let key = registry_key(upload_id, filename);
        let out_dir = self.scratch.assembled_dir();
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| DocConvError::storage(&out_dir, e))?;
        let out_path = out_dir.join(format!("{key}_{filename}"));

        let chunk_paths: Vec<&Path> = chunks.iter().map(|c| c.path.as_path()).collect();
        let size = match concatenate(&chunk_paths, &out_path).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&out_path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial artifact {}: {}", out_path.display(), rm);
                    }
                }
                return Err(e);
            }
        };

        self.ledger.advance(upload_id, SessionState::Assembled);
        self.registry.register(key.clone(), &out_path).await;
        info!(
            "Assembled {} from {} chunks ({} bytes) → {}",
            upload_id,
            chunks.len(),
            size,
            key
        );

        // The artifact is durable; chunk cleanup is best-effort.
        for chunk in &chunks {
            if let Err(e) = tokio::fs::remove_file(&chunk.path).await {
                warn!("Failed to remove chunk {}: {}", chunk.path.display(), e);
            }
        }
        if let Err(e) = tokio::fs::remove_dir(&session_dir).await {
            warn!(
                "Failed to remove session dir {}: {}; leaving it to the reaper",
                session_dir.display(),
                e
            );
            scratch::remove_dir_best_effort(&session_dir).await;
        }
        self.ledger.advance(upload_id, SessionState::Purged);

        Ok(AssembledArtifact {
            registry_key: key,
            path: out_path,
            size,
            chunk_count: chunks.len(),
        })
    }
}

/// Append every file in `parts`, in order, to a fresh `out` file.
async fn concatenate(parts: &[&Path], out: &Path) -> Result<u64> {
    let mut output = tokio::fs::File::create(out)
        .await
        .map_err(|e| DocConvError::storage(out, e))?;

    let mut total = 0u64;
    for part in parts {
        let mut input = tokio::fs::File::open(part)
            .await
            .map_err(|e| DocConvError::storage(*part, e))?;
        let copied = tokio::io::copy(&mut input, &mut output)
            .await
            .map_err(|e| DocConvError::storage(out, e))?;
        debug!("Appended {} ({} bytes)", part.display(), copied);
        total += copied;
    }

    output
        .flush()
        .await
        .map_err(|e| DocConvError::storage(out, e))?;
    output
        .sync_all()
        .await
        .map_err(|e| DocConvError::storage(out, e))?;
    Ok(total)
}

/// Deterministic registry key for `(upload_id, filename)`.
///
/// First 32 hex digits of `SHA-256(upload_id ‖ 0x00 ‖ filename)`.
pub fn registry_key(upload_id: &str, filename: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(upload_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(filename.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// Reduce a caller-supplied filename to a safe single path component.
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::ChunkStore;
    use std::time::Duration;

    struct Fixture {
        _tmp: tempfile::TempDir,
        scratch: ScratchSpace,
        store: ChunkStore,
        assembler: Assembler,
        registry: Arc<ArtifactRegistry>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(tmp.path());
        let ledger = Arc::new(SessionLedger::new());
        let registry = Arc::new(ArtifactRegistry::new(16, Duration::from_secs(3600)));
        Fixture {
            store: ChunkStore::new(scratch.clone(), Arc::clone(&ledger)),
            assembler: Assembler::new(scratch.clone(), ledger, Arc::clone(&registry)),
            scratch,
            registry,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn numeric_order_not_lexicographic() {
        let f = fixture();
        f.store.put_chunk("u", "2", b"BB").await.unwrap();
        f.store.put_chunk("u", "10", b"CC").await.unwrap();
        f.store.put_chunk("u", "1", b"AA").await.unwrap();

        let art = f.assembler.assemble("u", "doc.pdf").await.unwrap();
        assert_eq!(std::fs::read(&art.path).unwrap(), b"AABBCC");
        assert_eq!(art.size, 6);
        assert_eq!(art.chunk_count, 3);
        assert_eq!(f.registry.resolve(&art.registry_key).await.unwrap(), art.path);
    }

    #[tokio::test]
    async fn arrival_order_does_not_matter() {
        let parts: Vec<(String, Vec<u8>)> = (0..12)
            .map(|i| (i.to_string(), vec![i as u8; 3 + i]))
            .collect();

        let ascending = fixture();
        for (idx, bytes) in &parts {
            ascending.store.put_chunk("a", idx, bytes).await.unwrap();
        }
        let shuffled = fixture();
        for i in [7usize, 0, 11, 3, 9, 1, 5, 10, 2, 8, 4, 6] {
            let (idx, bytes) = &parts[i];
            shuffled.store.put_chunk("a", idx, bytes).await.unwrap();
        }

        let a = ascending.assembler.assemble("a", "f.bin").await.unwrap();
        let b = shuffled.assembler.assemble("a", "f.bin").await.unwrap();
        assert_eq!(std::fs::read(a.path).unwrap(), std::fs::read(b.path).unwrap());
    }

    #[tokio::test]
    async fn no_chunks_leaves_no_trace() {
        let f = fixture();
        let err = f.assembler.assemble("empty", "x.pdf").await.unwrap_err();
        assert!(matches!(err, DocConvError::NoChunks { .. }));
        assert!(f.registry.is_empty().await);
        let assembled = f.scratch.assembled_dir();
        let count = std::fs::read_dir(&assembled).map(|d| d.count()).unwrap_or(0);
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn chunks_are_removed_and_reentry_rejected() {
        let f = fixture();
        f.store.put_chunk("u", "0", b"x").await.unwrap();
        f.assembler.assemble("u", "x.bin").await.unwrap();
        assert!(!f.scratch.session_dir("u").exists());

        let again = f.assembler.assemble("u", "x.bin").await.unwrap_err();
        assert!(matches!(again, DocConvError::AlreadyAssembled { .. }));
        let late_chunk = f.store.put_chunk("u", "1", b"y").await.unwrap_err();
        assert!(matches!(late_chunk, DocConvError::AlreadyAssembled { .. }));
    }

    #[tokio::test]
    async fn failed_assembly_can_be_retried() {
        let f = fixture();
        assert!(f.assembler.assemble("late", "a.bin").await.is_err());
        f.store.put_chunk("late", "0", b"ok").await.unwrap();
        assert!(f.assembler.assemble("late", "a.bin").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn acknowledged_chunk_survives_a_racing_assemble() {
        let late = vec![b'B'; 64 * 1024];
        for trial in 0..64 {
            let f = fixture();
            let id = format!("race{trial}");
            f.store.put_chunk(&id, "0", b"A").await.unwrap();

            let writer = {
                let (store, id, late) = (f.store.clone(), id.clone(), late.clone());
                tokio::spawn(async move { store.put_chunk(&id, "1", &late).await })
            };
            let assembling = {
                let (assembler, id) = (f.assembler.clone(), id.clone());
                tokio::spawn(async move { assembler.assemble(&id, "race.bin").await })
            };

            let written = writer.await.unwrap();
            let artifact = assembling.await.unwrap().unwrap();
            let bytes = std::fs::read(&artifact.path).unwrap();
            match written {
                Ok(_) => {
                    assert_eq!(artifact.chunk_count, 2, "trial {trial}");
                    assert_eq!(bytes.len(), 1 + late.len(), "trial {trial}");
                    assert_eq!(&bytes[1..], late.as_slice());
                }
                Err(e) => {
                    assert!(matches!(e, DocConvError::AlreadyAssembled { .. }), "{e}");
                    assert_eq!(bytes, b"A");
                }
            }
            assert!(!f.scratch.session_dir(&id).exists());
        }
    }

    #[test]
    fn registry_key_is_deterministic() {
        let a = registry_key("u1", "a.pdf");
        assert_eq!(a, registry_key("u1", "a.pdf"));
        assert_eq!(a.len(), 32);
        assert_ne!(a, registry_key("u1", "b.pdf"));
        assert_ne!(a, registry_key("u2", "a.pdf"));
        // The separator keeps ("ab", "c") and ("a", "bc") apart.
        assert_ne!(registry_key("ab", "c"), registry_key("a", "bc"));
    }

    #[test]
    fn filenames_are_sanitised() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\my file.png"), "my_file.png");
        assert_eq!(sanitize_filename(""), "upload.bin");
        assert_eq!(sanitize_filename(".."), "upload.bin");
    }
}
