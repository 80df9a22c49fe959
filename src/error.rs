//! Error type for the edgequake-docconv library.
//!
//! Every failure the core can produce is a [`DocConvError`] variant. The
//! variants split cleanly into two groups:
//!
//! * **Caller faults**: [`Validation`](DocConvError::Validation),
//!   [`MissingArtifact`](DocConvError::MissingArtifact),
//!   [`NoChunks`](DocConvError::NoChunks),
//!   [`AlreadyAssembled`](DocConvError::AlreadyAssembled). These are
//!   detected before any external resource is touched.
//!
//! * **Environment / server faults**: storage, the external rasteriser,
//!   codec failures. These carry enough context to act on (the path, the
//!   missing tool and how to install it).
//!
//! [`DocConvError::code`] gives the stable machine-readable code used in
//! HTTP error bodies.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-docconv library.
#[derive(Debug, Error)]
pub enum DocConvError {
    // ── Caller errors ─────────────────────────────────────────────────────
    /// A request field is missing or out of range.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A registry key does not resolve to an assembled artifact.
    #[error("No assembled upload found for key '{key}'\nUpload and assemble the file again.")]
    MissingArtifact { key: String },

    /// `assemble` was called for a session with no stored chunks.
    #[error("No chunks were uploaded for upload '{upload_id}'")]
    NoChunks { upload_id: String },

    /// The session has already been (or is being) assembled.
    #[error("Upload '{upload_id}' has already been assembled")]
    AlreadyAssembled { upload_id: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Reading or writing scratch storage failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── External tool errors ──────────────────────────────────────────────
    /// The external rasteriser is not installed or does not start.
    #[error("Required tool '{tool}' is not available.\n{hint}")]
    Unavailable { tool: String, hint: String },

    /// The external rasteriser failed on this document.
    #[error("Rasterisation failed: {0}")]
    Rasterization(String),

    // ── Codec errors ──────────────────────────────────────────────────────
    /// An image could not be decoded or re-encoded, or the document could
    /// not be written.
    #[error("Conversion failed: {0}")]
    Conversion(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panicked, poisoned lock…).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocConvError {
    /// Stable snake_case code for machine consumers.
    pub fn code(&self) -> &'static str {
        match self {
            DocConvError::Validation(_) => "validation_error",
            DocConvError::MissingArtifact { .. } => "missing_artifact",
            DocConvError::NoChunks { .. } => "no_chunks",
            DocConvError::AlreadyAssembled { .. } => "already_assembled",
            DocConvError::Storage { .. } => "storage_error",
            DocConvError::Unavailable { .. } => "unavailable",
            DocConvError::Rasterization(_) => "rasterization_error",
            DocConvError::Conversion(_) => "conversion_error",
            DocConvError::Internal(_) => "internal_error",
        }
    }

    /// `true` when the request itself was at fault (4xx territory).
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            DocConvError::Validation(_)
                | DocConvError::MissingArtifact { .. }
                | DocConvError::NoChunks { .. }
                | DocConvError::AlreadyAssembled { .. }
        )
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocConvError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = DocConvError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_display() {
        let e = DocConvError::MissingArtifact {
            key: "abc123".into(),
        };
        assert!(e.to_string().contains("abc123"));
        assert_eq!(e.code(), "missing_artifact");
        assert!(e.is_caller_fault());
    }

    #[test]
    fn unavailable_names_the_tool() {
        let e = DocConvError::Unavailable {
            tool: "pdftoppm".into(),
            hint: "Install poppler-utils".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("pdftoppm"), "got: {msg}");
        assert!(msg.contains("poppler-utils"), "got: {msg}");
        assert!(!e.is_caller_fault());
    }

    #[test]
    fn storage_keeps_path() {
        let e = DocConvError::storage(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(e.to_string().contains("/tmp/x"));
        assert!(e.to_string().contains("disk full"));
        assert_eq!(e.code(), "storage_error");
    }
}
