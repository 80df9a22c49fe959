//! Source resolution: a direct upload or a registry key → something readable.
//!
//! ## Why resolve before streaming?
//!
//! Once the first response byte is sent the status line is fixed. Resolving
//! every source up front (and, for images, reading every header) moves all
//! predictable failures (unknown keys, files that are not images or not PDFs)
//! ahead of that point so they still produce a proper 4xx/5xx response.

use crate::error::{DocConvError, Result};
use crate::pipeline::encode;
use crate::registry::ArtifactRegistry;
use crate::scratch::ScratchSpace;
use std::fmt;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Where the bytes of one conversion input come from.
#[derive(Clone)]
pub enum SourceRef {
    /// Bytes sent with the conversion request itself.
    Upload { name: String, data: Vec<u8> },
    /// A key previously returned by `assemble`.
    Key(String),
}

impl SourceRef {
    pub fn upload(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        SourceRef::Upload {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn key(key: impl Into<String>) -> Self {
        SourceRef::Key(key.into())
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Upload { name, data } => f
                .debug_struct("Upload")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
            SourceRef::Key(key) => f.debug_tuple("Key").field(key).finish(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Upload { name, .. } => write!(f, "upload '{name}'"),
            SourceRef::Key(key) => write!(f, "key '{key}'"),
        }
    }
}

// ── Image sources ────────────────────────────────────────────────────────

/// An image source whose bytes are known to be reachable.
#[derive(Debug)]
pub enum ResolvedImage {
    Memory { name: String, data: Vec<u8> },
    File(PathBuf),
}

impl ResolvedImage {
    /// Header dimensions; fails with a conversion error on unknown formats.
    ///
    /// Blocking.
    pub fn probe(&self) -> Result<(u32, u32)> {
        match self {
            ResolvedImage::Memory { data, .. } => encode::probe_dimensions(Cursor::new(data)),
            ResolvedImage::File(path) => {
                let file =
                    std::fs::File::open(path).map_err(|e| DocConvError::storage(path, e))?;
                encode::probe_dimensions(BufReader::new(file))
            }
        }
    }

    /// Full image bytes. Blocking.
    pub fn load(&self) -> Result<std::borrow::Cow<'_, [u8]>> {
        match self {
            ResolvedImage::Memory { data, .. } => Ok(std::borrow::Cow::Borrowed(data)),
            ResolvedImage::File(path) => std::fs::read(path)
                .map(std::borrow::Cow::Owned)
                .map_err(|e| DocConvError::storage(path, e)),
        }
    }

    pub fn label(&self) -> String {
        match self {
            ResolvedImage::Memory { name, .. } => name.clone(),
            ResolvedImage::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Resolve image sources in order. Keys must be live in `registry`.
pub async fn resolve_images(
    registry: &ArtifactRegistry,
    sources: Vec<SourceRef>,
) -> Result<Vec<ResolvedImage>> {
    let mut resolved = Vec::with_capacity(sources.len());
    for source in sources {
        resolved.push(match source {
            SourceRef::Upload { name, data } => ResolvedImage::Memory { name, data },
            SourceRef::Key(key) => ResolvedImage::File(registry.resolve(&key).await?),
        });
    }
    Ok(resolved)
}

// ── PDF sources ──────────────────────────────────────────────────────────

/// A PDF on disk, ready to hand to an external program.
///
/// Uploaded bytes live in a temp file under `rasterize_inputs/` that is
/// deleted when this value is dropped; registered artifacts are left alone.
#[derive(Debug)]
pub enum PdfInput {
    Uploaded(NamedTempFile),
    Registered(PathBuf),
}

impl PdfInput {
    pub fn path(&self) -> &Path {
        match self {
            PdfInput::Uploaded(tmp) => tmp.path(),
            PdfInput::Registered(path) => path,
        }
    }
}

/// Resolve a PDF source to a file, checking the `%PDF` magic bytes.
pub async fn materialize_pdf(
    registry: &ArtifactRegistry,
    scratch: &ScratchSpace,
    source: SourceRef,
) -> Result<PdfInput> {
    match source {
        SourceRef::Upload { name, data } => {
            if !data.starts_with(PDF_MAGIC) {
                return Err(not_a_pdf(&name, &data));
            }
            let dir = scratch.raster_inputs_dir();
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| DocConvError::storage(&dir, e))?;
            let tmp = tempfile::Builder::new()
                .prefix("upload_")
                .suffix(".pdf")
                .tempfile_in(&dir)
                .map_err(|e| DocConvError::storage(&dir, e))?;
            tokio::fs::write(tmp.path(), &data)
                .await
                .map_err(|e| DocConvError::storage(tmp.path(), e))?;
            debug!("Staged uploaded PDF '{}' at {}", name, tmp.path().display());
            Ok(PdfInput::Uploaded(tmp))
        }
        SourceRef::Key(key) => {
            let path = registry.resolve(&key).await?;
            let mut head = Vec::with_capacity(PDF_MAGIC.len());
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| DocConvError::storage(&path, e))?;
            file.take(PDF_MAGIC.len() as u64)
                .read_to_end(&mut head)
                .await
                .map_err(|e| DocConvError::storage(&path, e))?;
            if head != PDF_MAGIC {
                return Err(not_a_pdf(&key, &head));
            }
            Ok(PdfInput::Registered(path))
        }
    }
}

fn not_a_pdf(label: &str, head: &[u8]) -> DocConvError {
    let shown: String = head
        .iter()
        .take(PDF_MAGIC.len())
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    DocConvError::Validation(format!(
        "'{label}' is not a PDF (expected %PDF, found bytes [{shown}])"
    ))
}
