//! Chunked uploads: staging chunks and assembling them exactly once.
//!
//! ## Data Flow
//!
//! ```text
//! put_chunk ──▶ upload_chunks/<id>/chunk_<index>   (atomic: temp + rename)
//!                      │
//! assemble  ──▶ sort (numeric-aware) ──▶ concatenate ──▶ assembled_uploads/<key>_<name>
//!                                                     └──▶ ArtifactRegistry
//! ```
//!
//! 1. [`chunks`]: [`ChunkStore`], validated, atomic per-session chunk writes
//! 2. [`assemble`]: [`Assembler`], one-shot concatenation guarded by the
//!    [`SessionLedger`] state machine

pub mod assemble;
pub mod chunks;

pub use assemble::{registry_key, sanitize_filename, AssembledArtifact, Assembler};
pub use chunks::{ChunkStore, StoredChunk};

use crate::error::{DocConvError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

/// Longest accepted upload id or chunk index.
pub const MAX_TOKEN_LEN: usize = 128;

/// Validate an upload id or chunk index for use as a path component.
pub(crate) fn validate_token(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DocConvError::Validation(format!("{kind} must not be empty")));
    }
    if value.len() > MAX_TOKEN_LEN {
        return Err(DocConvError::Validation(format!(
            "{kind} is longer than {MAX_TOKEN_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DocConvError::Validation(format!(
            "{kind} '{value}' may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

// ── Session ledger ───────────────────────────────────────────────────────

/// Lifecycle of one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting chunks (also the state of any session the ledger has not seen).
    Pending,
    /// An `assemble` call owns the session.
    Assembling,
    /// The artifact is written and registered.
    Assembled,
    /// Chunk storage has been removed.
    Purged,
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    /// Chunk writes that passed the `Pending` check and have not finished.
    writers: usize,
    at: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Pending,
            writers: 0,
            at: Instant::now(),
        }
    }
}

/// Single mutation point for session state.
///
/// Every transition goes through one mutex so two `assemble` calls for the
/// same upload cannot both pass the `Pending` check. Chunk writes register
/// themselves through `begin_write`; assembly claims the
/// session first (which refuses new writers) and then waits for the writers
/// already in flight, so every acknowledged chunk is part of the artifact.
#[derive(Debug, Default)]
pub struct SessionLedger {
    sessions: Mutex<HashMap<String, Session>>,
    drained: Notify,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, upload_id: &str) -> SessionState {
        self.lock()
            .get(upload_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Pending)
    }

    /// `true` while chunks may still be written for `upload_id`.
    pub fn accepts_chunks(&self, upload_id: &str) -> bool {
        self.state(upload_id) == SessionState::Pending
    }

    /// Register an in-flight chunk write. Refused unless the session is
    /// `Pending`; the write is finished when the guard drops.
    pub(crate) fn begin_write(&self, upload_id: &str) -> Result<WriteGuard<'_>> {
        let mut sessions = self.lock();
        let session = sessions.entry(upload_id.to_string()).or_default();
        if session.state != SessionState::Pending {
            debug!(
                "Rejecting chunk for {} in state {:?}",
                upload_id, session.state
            );
            return Err(DocConvError::AlreadyAssembled {
                upload_id: upload_id.to_string(),
            });
        }
        session.writers += 1;
        session.at = Instant::now();
        Ok(WriteGuard {
            ledger: self,
            upload_id: upload_id.to_string(),
        })
    }

    fn end_write(&self, upload_id: &str) {
        let mut sessions = self.lock();
        let drained = match sessions.get_mut(upload_id) {
            Some(session) => {
                session.writers = session.writers.saturating_sub(1);
                session.writers == 0
            }
            None => true,
        };
        drop(sessions);
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Claim the session for assembly (`Pending → Assembling`), then wait
    /// until no chunk write is in flight.
    ///
    /// The claim is released with [`abort`](Self::abort) if the returned
    /// guard is dropped before [`AssemblyClaim::complete`].
    pub(crate) async fn begin(&self, upload_id: &str) -> Result<AssemblyClaim<'_>> {
        {
            let mut sessions = self.lock();
            let session = sessions.entry(upload_id.to_string()).or_default();
            if session.state != SessionState::Pending {
                debug!(
                    "Rejecting assemble of {} in state {:?}",
                    upload_id, session.state
                );
                return Err(DocConvError::AlreadyAssembled {
                    upload_id: upload_id.to_string(),
                });
            }
            session.state = SessionState::Assembling;
            session.at = Instant::now();
        }
        let claim = AssemblyClaim {
            ledger: self,
            upload_id: upload_id.to_string(),
            done: false,
        };

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.writers(upload_id) == 0 {
                return Ok(claim);
            }
            debug!("Waiting for chunk writes of {} to finish", upload_id);
            notified.await;
        }
    }

    pub(crate) fn advance(&self, upload_id: &str, next: SessionState) {
        let mut sessions = self.lock();
        let session = sessions.entry(upload_id.to_string()).or_default();
        session.state = next;
        session.at = Instant::now();
    }

    /// Return a failed assembly to `Pending`.
    pub(crate) fn abort(&self, upload_id: &str) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get_mut(upload_id) {
            session.state = SessionState::Pending;
            session.at = Instant::now();
        }
    }

    /// Forget sessions whose last transition is older than `max_age`.
    pub fn prune(&self, max_age: Duration) {
        self.lock().retain(|_, s| {
            s.state == SessionState::Assembling || s.writers > 0 || s.at.elapsed() < max_age
        });
    }

    fn writers(&self, upload_id: &str) -> usize {
        self.lock().get(upload_id).map(|s| s.writers).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-flight chunk write. See [`SessionLedger::begin_write`].
#[derive(Debug)]
pub(crate) struct WriteGuard<'a> {
    ledger: &'a SessionLedger,
    upload_id: String,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.ledger.end_write(&self.upload_id);
    }
}

/// Exclusive ownership of a session during assembly.
#[derive(Debug)]
pub(crate) struct AssemblyClaim<'a> {
    ledger: &'a SessionLedger,
    upload_id: String,
    done: bool,
}

impl AssemblyClaim<'_> {
    /// Keep the session's final state instead of returning it to `Pending`.
    pub(crate) fn complete(mut self) {
        self.done = true;
    }
}

impl Drop for AssemblyClaim<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.ledger.abort(&self.upload_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn token_validation() {
        assert!(validate_token("index", "12").is_ok());
        assert!(validate_token("uploadId", "a-b_C9").is_ok());
        assert!(validate_token("index", "").is_err());
        assert!(validate_token("index", "../etc").is_err());
        assert!(validate_token("index", "a/b").is_err());
        assert!(validate_token("index", &"x".repeat(MAX_TOKEN_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn ledger_rejects_reentry() {
        let ledger = SessionLedger::new();
        assert_eq!(ledger.state("u"), SessionState::Pending);
        ledger.begin("u").await.unwrap().complete();
        assert!(!ledger.accepts_chunks("u"));
        assert!(matches!(
            ledger.begin("u").await,
            Err(DocConvError::AlreadyAssembled { .. })
        ));
        assert!(ledger.begin_write("u").is_err());
        ledger.advance("u", SessionState::Purged);
        assert!(ledger.begin("u").await.is_err());
    }

    #[tokio::test]
    async fn dropped_claim_returns_to_pending() {
        let ledger = SessionLedger::new();
        let claim = ledger.begin("u").await.unwrap();
        assert_eq!(ledger.state("u"), SessionState::Assembling);
        drop(claim);
        assert!(ledger.accepts_chunks("u"));
        assert!(ledger.begin("u").await.is_ok());
    }

    #[tokio::test]
    async fn claim_waits_for_in_flight_writes() {
        let ledger = Arc::new(SessionLedger::new());
        let write = ledger.begin_write("u").unwrap();

        let claiming = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.begin("u").await.map(AssemblyClaim::complete) })
        };
        while ledger.state("u") != SessionState::Assembling {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!claiming.is_finished());
        // The claim already shuts out new writers.
        assert!(ledger.begin_write("u").is_err());

        drop(write);
        claiming.await.unwrap().unwrap();
        assert_eq!(ledger.state("u"), SessionState::Assembling);
    }

    #[tokio::test]
    async fn prune_keeps_in_flight_sessions() {
        let ledger = SessionLedger::new();
        ledger.begin("busy").await.unwrap().complete();
        ledger.begin("done").await.unwrap().complete();
        ledger.advance("done", SessionState::Purged);
        let _write = ledger.begin_write("writing").unwrap();
        ledger.prune(Duration::ZERO);
        assert_eq!(ledger.state("busy"), SessionState::Assembling);
        assert_eq!(ledger.state("done"), SessionState::Pending);
        let _second = ledger.begin_write("writing").unwrap();
        assert_eq!(ledger.writers("writing"), 2);
    }
}
