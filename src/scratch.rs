//! Scratch-space layout, delayed cleanup and the background reaper.
//!
//! Everything the service writes to disk lives below one root:
//!
//! ```text
//! <root>/
//!  ├─ upload_chunks/<uploadId>/chunk_<index>     staged chunks
//!  ├─ assembled_uploads/<key>_<filename>         assembled artifacts
//!  ├─ rasterize_inputs/upload_*.pdf              uploaded PDFs awaiting pdftoppm
//!  └─ pdf_images_<random>/page-<n>.png           rasteriser output
//! ```
//!
//! Nothing below the root is guaranteed to be deleted by the request that
//! created it (abandoned uploads, assembled files nobody converts), so a
//! [`Reaper`] sweeps the namespace by modification age.

use crate::error::{DocConvError, Result};
use crate::upload::SessionLedger;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const CHUNKS_DIR: &str = "upload_chunks";
pub const ASSEMBLED_DIR: &str = "assembled_uploads";
pub const RASTER_INPUTS_DIR: &str = "rasterize_inputs";
pub const PAGE_DIR_PREFIX: &str = "pdf_images_";

/// Handle on the scratch namespace rooted at one directory.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunks_root(&self) -> PathBuf {
        self.root.join(CHUNKS_DIR)
    }

    pub fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.chunks_root().join(upload_id)
    }

    pub fn assembled_dir(&self) -> PathBuf {
        self.root.join(ASSEMBLED_DIR)
    }

    pub fn raster_inputs_dir(&self) -> PathBuf {
        self.root.join(RASTER_INPUTS_DIR)
    }

    /// Create the fixed top-level directories. Idempotent.
    pub async fn prepare(&self) -> Result<()> {
        for dir in [
            self.chunks_root(),
            self.assembled_dir(),
            self.raster_inputs_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| DocConvError::storage(&dir, e))?;
        }
        debug!("Scratch space ready at {}", self.root.display());
        Ok(())
    }
}

/// Remove a directory tree, logging instead of failing.
pub async fn remove_dir_best_effort(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Remove `path` after `delay` if it still exists.
///
/// This is the fallback upper bound for rasteriser working directories;
/// the normal path removes them as soon as their response stream ends.
pub fn schedule_removal(path: PathBuf, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if tokio::fs::metadata(&path).await.is_ok() {
            info!(
                "Retention of {}s elapsed, removing {}",
                delay.as_secs(),
                path.display()
            );
            remove_dir_best_effort(&path).await;
        }
    })
}

// ── Reaper ────────────────────────────────────────────────────────────────

/// Outcome of one [`Reaper::sweep`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: usize,
    pub failed: usize,
}

/// Periodically deletes scratch entries older than `max_age`.
#[derive(Debug, Clone)]
pub struct Reaper {
    scratch: ScratchSpace,
    max_age: Duration,
    interval: Duration,
    ledger: Option<Arc<SessionLedger>>,
}

impl Reaper {
    pub fn new(scratch: ScratchSpace, max_age: Duration, interval: Duration) -> Self {
        Self {
            scratch,
            max_age,
            interval,
            ledger: None,
        }
    }

    /// Also forget session ledger entries older than `max_age` on each sweep.
    pub fn with_ledger(mut self, ledger: Arc<SessionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Run one sweep over the whole namespace.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        self.sweep_children(&self.scratch.chunks_root(), |_| true, &mut stats)
            .await;
        self.sweep_children(&self.scratch.assembled_dir(), |_| true, &mut stats)
            .await;
        self.sweep_children(&self.scratch.raster_inputs_dir(), |_| true, &mut stats)
            .await;
        self.sweep_children(
            self.scratch.root(),
            |name| name.starts_with(PAGE_DIR_PREFIX),
            &mut stats,
        )
        .await;

        if let Some(ref ledger) = self.ledger {
            ledger.prune(self.max_age);
        }

        if stats.removed > 0 || stats.failed > 0 {
            info!(
                "Scratch sweep: removed {}, failed {}",
                stats.removed, stats.failed
            );
        }
        stats
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    async fn sweep_children<F>(&self, dir: &Path, select: F, stats: &mut SweepStats)
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("Cannot list {}: {}", dir.display(), e);
                return;
            }
        };

        let now = SystemTime::now();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error listing {}: {}", dir.display(), e);
                    break;
                }
            };

            let name = entry.file_name();
            if !select(&name.to_string_lossy()) {
                continue;
            }

            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < self.max_age {
                continue;
            }

            let path = entry.path();
            let result = if meta.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {
                    debug!("Reaped {} (age {}s)", path.display(), age.as_secs());
                    stats.removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to reap {}: {}", path.display(), e);
                    stats.failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn populated() -> (tempfile::TempDir, ScratchSpace) {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(tmp.path());
        scratch.prepare().await.unwrap();

        let session = scratch.session_dir("abc");
        tokio::fs::create_dir_all(&session).await.unwrap();
        tokio::fs::write(session.join("chunk_1"), b"x").await.unwrap();
        tokio::fs::write(scratch.assembled_dir().join("k_file.bin"), b"y")
            .await
            .unwrap();
        let pages = scratch.root().join("pdf_images_test");
        tokio::fs::create_dir_all(&pages).await.unwrap();
        tokio::fs::write(pages.join("page-1.png"), b"z").await.unwrap();
        tokio::fs::create_dir_all(scratch.root().join("unrelated"))
            .await
            .unwrap();
        (tmp, scratch)
    }

    #[tokio::test]
    async fn prepare_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(tmp.path().join("nested"));
        scratch.prepare().await.unwrap();
        scratch.prepare().await.unwrap();
        assert!(scratch.chunks_root().is_dir());
        assert!(scratch.assembled_dir().is_dir());
        assert!(scratch.raster_inputs_dir().is_dir());
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_entries() {
        let (_tmp, scratch) = populated().await;
        let reaper = Reaper::new(
            scratch.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        let stats = reaper.sweep().await;
        assert_eq!(stats.removed, 0);
        assert!(scratch.session_dir("abc").exists());
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries_only_in_namespace() {
        let (_tmp, scratch) = populated().await;
        let reaper = Reaper::new(scratch.clone(), Duration::ZERO, Duration::from_secs(60));
        let stats = reaper.sweep().await;
        assert_eq!(stats.removed, 3);
        assert!(!scratch.session_dir("abc").exists());
        assert!(!scratch.root().join("pdf_images_test").exists());
        assert!(scratch.root().join("unrelated").exists());
        // Top-level directories survive a sweep.
        assert!(scratch.assembled_dir().is_dir());
    }

    #[tokio::test]
    async fn scheduled_removal_deletes_after_delay() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("pdf_images_delay");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        schedule_removal(dir.clone(), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!dir.exists());
    }
}
