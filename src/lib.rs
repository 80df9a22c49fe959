//! # edgequake-docconv
//!
//! Chunked uploads, image → PDF composition and PDF → image rasterisation,
//! as a library, an HTTP service and a CLI.
//!
//! ## Why this crate?
//!
//! Browsers and mobile clients cannot reliably push a 300 MB scan in one
//! request, and converting documents on the client is slow and uneven.
//! This crate accepts uploads in chunks, reassembles them into a file the
//! server can reference by an opaque key, and runs two conversions whose
//! output is streamed back as it is produced instead of being buffered.
//!
//! ## Pipeline Overview
//!
//! ```text
//! chunks ──▶ upload::ChunkStore ──▶ upload::Assembler ──▶ ArtifactRegistry
//!                                                            │ key
//!                  ┌─────────────────────────────────────────┤
//!                  ▼                                         ▼
//!  images ──▶ compose (preflight → JPEG → layout → PDF)   rasterize (pdftoppm → ZIP)
//!                  │                                         │
//!                  └──────────────▶ ByteStream ◀─────────────┘
//!                                      │
//!                           HTTP body / file on disk
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docconv::{images_to_pdf, stream, ArtifactRegistry, ImagesToPdfRequest,
//!     PageSizePolicy, SourceRef};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ArtifactRegistry::new(16, Duration::from_secs(600));
//!     let scan = std::fs::read("scan.png")?;
//!     let request = ImagesToPdfRequest::new(vec![SourceRef::upload("scan.png", scan)])
//!         .page_size(PageSizePolicy::A4)
//!         .margin(36.0);
//!
//!     let output = images_to_pdf(&registry, request).await?;
//!     let mut file = tokio::fs::File::create(&output.filename).await?;
//!     stream::drain_into(output.body, &mut file).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum router and handlers ([`server`]) |
//! | `cli`    | on      | Enables the `docconv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable both when using only the library:
//! ```toml
//! edgequake-docconv = { version = "0.2", default-features = false }
//! ```
//!
//! ## External tools
//!
//! PDF → images needs `pdftoppm` from poppler-utils. Its presence is probed
//! at startup and cached; when it is missing that one operation fails with
//! [`DocConvError::Unavailable`] and everything else keeps working.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod layout;
pub mod order;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod scratch;
pub mod stream;
pub mod upload;

#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Orientation, PageSizePolicy, ServiceConfig, ServiceConfigBuilder};
pub use error::{DocConvError, Result};
pub use layout::{compute_placement, Placement};
pub use pipeline::compose::{images_to_pdf, ImagesToPdfRequest};
pub use pipeline::rasterize::{PdfToImagesRequest, Rasterizer};
pub use pipeline::source::SourceRef;
pub use pipeline::ConvertedOutput;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use registry::ArtifactRegistry;
pub use scratch::{Reaper, ScratchSpace};
pub use stream::ByteStream;
pub use upload::{AssembledArtifact, Assembler, ChunkStore, SessionLedger};
