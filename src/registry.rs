//! Artifact registry: opaque key → assembled file path.
//!
//! The registry lets a conversion request reference a file that was
//! uploaded in chunks earlier, without re-uploading it. It is an explicit
//! component handed to request handlers (not a global), lives in process
//! memory only, and is bounded twice over:
//!
//! - **capacity**: least-recently-used keys are evicted once full;
//! - **TTL**: keys stop resolving `ttl` after registration.
//!
//! A key that was evicted, expired, never registered, or whose file has
//! since been reaped resolves to [`DocConvError::MissingArtifact`]; never
//! to some other file.

use crate::config::ServiceConfig;
use crate::error::{DocConvError, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    registered_at: Instant,
}

/// Bounded, concurrency-safe map from registry key to artifact path.
#[derive(Debug)]
pub struct ArtifactRegistry {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl ArtifactRegistry {
    /// Create a registry holding at most `capacity` keys, each valid for `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.registry_capacity, config.registry_ttl)
    }

    /// Map `key` to `path`, replacing any previous mapping for `key`.
    pub async fn register(&self, key: impl Into<String>, path: impl Into<PathBuf>) {
        let key = key.into();
        let path = path.into();
        debug!("Registering artifact {} → {}", key, path.display());
        let mut entries = self.entries.lock().await;
        if let Some((evicted, _)) = entries.push(
            key.clone(),
            Entry {
                path,
                registered_at: Instant::now(),
            },
        ) {
            if evicted != key {
                debug!("Registry full, evicted {}", evicted);
            }
        }
    }

    /// Resolve `key` to the registered path.
    pub async fn resolve(&self, key: &str) -> Result<PathBuf> {
        let path = {
            let mut entries = self.entries.lock().await;
            let expired = match entries.get(key) {
                None => return Err(missing(key)),
                Some(entry) => entry.registered_at.elapsed() >= self.ttl,
            };
            if expired {
                entries.pop(key);
                debug!("Artifact {} expired", key);
                return Err(missing(key));
            }
            match entries.peek(key) {
                Some(entry) => entry.path.clone(),
                None => return Err(missing(key)),
            }
        };

        // Checked outside the lock: the reaper may have removed the file.
        if tokio::fs::metadata(&path).await.is_err() {
            let mut entries = self.entries.lock().await;
            if entries.peek(key).is_some_and(|e| e.path == path) {
                entries.pop(key);
            }
            debug!("Artifact {} points at a missing file", key);
            return Err(missing(key));
        }

        Ok(path)
    }

    /// Number of live (possibly expired but not yet observed) entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn missing(key: &str) -> DocConvError {
    DocConvError::MissingArtifact {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn touch(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, b"data").unwrap();
        p
    }

    #[tokio::test]
    async fn unknown_key_is_missing() {
        let reg = ArtifactRegistry::new(4, Duration::from_secs(60));
        let err = reg.resolve("never-registered").await.unwrap_err();
        assert!(matches!(err, DocConvError::MissingArtifact { .. }));
    }

    #[tokio::test]
    async fn registered_key_resolves_to_exact_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(&dir, "a.bin");
        let b = touch(&dir, "b.bin");
        let reg = ArtifactRegistry::new(4, Duration::from_secs(60));
        reg.register("ka", &a).await;
        reg.register("kb", &b).await;
        assert_eq!(reg.resolve("ka").await.unwrap(), a);
        assert_eq!(reg.resolve("kb").await.unwrap(), b);
        // Resolving twice is stable.
        assert_eq!(reg.resolve("ka").await.unwrap(), a);
    }

    #[tokio::test]
    async fn least_recently_used_key_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ArtifactRegistry::new(2, Duration::from_secs(60));
        reg.register("k1", touch(&dir, "1")).await;
        reg.register("k2", touch(&dir, "2")).await;
        reg.resolve("k1").await.unwrap(); // k2 becomes LRU
        reg.register("k3", touch(&dir, "3")).await;
        assert!(reg.resolve("k1").await.is_ok());
        assert!(reg.resolve("k2").await.is_err());
        assert!(reg.resolve("k3").await.is_ok());
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_key_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ArtifactRegistry::new(4, Duration::from_secs(60));
        reg.register("k", touch(&dir, "f")).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(reg.resolve("k").await.is_ok());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(reg.resolve("k").await.is_err());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn deleted_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "gone");
        let reg = ArtifactRegistry::new(4, Duration::from_secs(60));
        reg.register("k", &p).await;
        std::fs::remove_file(&p).unwrap();
        assert!(reg.resolve("k").await.is_err());
        assert!(reg.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_register_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Arc::new(ArtifactRegistry::new(256, Duration::from_secs(60)));

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let reg = Arc::clone(&reg);
                let path = touch(&dir, &format!("f{i}"));
                tokio::spawn(async move {
                    let key = format!("k{i}");
                    reg.register(key.clone(), &path).await;
                    for _ in 0..20 {
                        assert_eq!(reg.resolve(&key).await.unwrap(), path);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(reg.len().await, 64);
        for i in 0..64 {
            let expected = dir.path().join(format!("f{i}"));
            assert_eq!(reg.resolve(&format!("k{i}")).await.unwrap(), expected);
        }
    }
}
