//! PDF → PNG pages via an external rasteriser, returned as a streamed ZIP.
//!
//! ## Why an external process?
//!
//! Rendering PDF correctly (fonts, transparency, shading, broken files) is a
//! large problem that poppler already solves. `pdftoppm` writes one PNG per
//! page; this module only orchestrates it:
//!
//! ```text
//! source ──▶ %PDF check ──▶ probe ──▶ pdftoppm -r DPI -png in <work>/page
//!                                         │
//!                      page-1.png … page-K.png (numeric order)
//!                                         │
//!                         ZIP: page_1.png … page_K.png ──▶ ByteStream
//! ```
//!
//! ## Working directory lifetime
//!
//! The rasteriser writes into a fresh `pdf_images_*` directory under the
//! scratch root. The directory handle moves into the streaming task and is
//! dropped when that task ends, whether it completed, failed or the client
//! disconnected. A delayed removal is scheduled as well, so the directory
//! has a hard upper lifetime even if the task never runs to completion.

use crate::config::ServiceConfig;
use crate::error::{DocConvError, Result};
use crate::order;
use crate::pipeline::archive::write_page_archive;
use crate::pipeline::source::{materialize_pdf, SourceRef};
use crate::pipeline::{output_filename, ConvertedOutput};
use crate::progress::{or_noop, ProgressCallback};
use crate::registry::ArtifactRegistry;
use crate::scratch::{self, ScratchSpace, PAGE_DIR_PREFIX};
use crate::stream;
use exec_probe::Capability;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_ZIP_NAME: &str = "pages.zip";

/// Arguments used to check that the rasteriser starts.
pub const PROBE_ARGS: [&str; 1] = ["-v"];

const INSTALL_HINT: &str = "Install poppler-utils (Debian/Ubuntu: apt install poppler-utils, \
                            macOS: brew install poppler) or point the rasterizer program at \
                            a pdftoppm binary.";

/// `pdftoppm` names pages `<prefix>-<n>.png`, zero-padding `n` to the width
/// of the page count.
static PAGE_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d+)\.png$").unwrap());

/// Parameters of one PDF → images conversion.
#[derive(Clone)]
pub struct PdfToImagesRequest {
    pub source: SourceRef,
    pub output_name: String,
    pub progress: Option<ProgressCallback>,
}

impl PdfToImagesRequest {
    pub fn new(source: SourceRef) -> Self {
        Self {
            source,
            output_name: DEFAULT_ZIP_NAME.to_string(),
            progress: None,
        }
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

impl fmt::Debug for PdfToImagesRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfToImagesRequest")
            .field("source", &self.source)
            .field("output_name", &self.output_name)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Runs the external rasteriser against scratch storage.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    capability: Arc<Capability>,
    scratch: ScratchSpace,
    dpi: u32,
    timeout: Duration,
    retention: Duration,
}

impl Rasterizer {
    pub fn new(capability: Arc<Capability>, config: &ServiceConfig) -> Self {
        Self {
            capability,
            scratch: ScratchSpace::new(&config.scratch_root),
            dpi: config.dpi,
            timeout: config.process_timeout,
            retention: config.cleanup_retention,
        }
    }

    /// The capability for the configured rasteriser program.
    pub fn capability_for(config: &ServiceConfig) -> Arc<Capability> {
        let probe_timeout = config
            .process_timeout
            .min(exec_probe::DEFAULT_PROBE_TIMEOUT);
        Arc::new(
            Capability::new(config.rasterizer_program.clone(), PROBE_ARGS)
                .with_probe_timeout(probe_timeout),
        )
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Rasterise the request's PDF and stream its pages as a ZIP.
    ///
    /// # Errors
    /// - [`DocConvError::Validation`] if the source is not a PDF
    /// - [`DocConvError::MissingArtifact`] for an unknown key
    /// - [`DocConvError::Unavailable`] if the rasteriser is not installed;
    ///   no working directory is created in that case
    /// - [`DocConvError::Rasterization`] if it fails, times out or renders
    ///   no pages
    pub async fn pdf_to_images(
        &self,
        registry: &ArtifactRegistry,
        request: PdfToImagesRequest,
    ) -> Result<ConvertedOutput> {
        let PdfToImagesRequest {
            source,
            output_name,
            progress,
        } = request;
        let filename = output_filename(&output_name, DEFAULT_ZIP_NAME);
        info!("Rasterising {} into '{}' at {} DPI", source, filename, self.dpi);

        // ── Resolve input ────────────────────────────────────────────────
        let input = materialize_pdf(registry, &self.scratch, source).await?;

        // ── Probe ────────────────────────────────────────────────────────
        if !self.capability.ensure().await {
            return Err(DocConvError::Unavailable {
                tool: self.capability.program().to_string(),
                hint: INSTALL_HINT.to_string(),
            });
        }

        // ── Rasterise ────────────────────────────────────────────────────
        let root = self.scratch.root();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| DocConvError::storage(root, e))?;
        let workdir = tempfile::Builder::new()
            .prefix(PAGE_DIR_PREFIX)
            .tempdir_in(root)
            .map_err(|e| DocConvError::storage(root, e))?;

        let args: Vec<OsString> = vec![
            "-r".into(),
            self.dpi.to_string().into(),
            "-png".into(),
            input.path().as_os_str().to_owned(),
            workdir.path().join("page").into_os_string(),
        ];
        let status = self
            .capability
            .run(&args, self.timeout)
            .await
            .map_err(|e| DocConvError::Rasterization(e.to_string()))?;
        if !status.success() {
            return Err(DocConvError::Rasterization(format!(
                "'{}' exited with {}",
                self.capability.program(),
                status
            )));
        }
        drop(input);

        let pages = list_rendered_pages(workdir.path()).await?;
        if pages.is_empty() {
            return Err(DocConvError::Rasterization(
                "the rasteriser produced no pages".into(),
            ));
        }
        let page_count = pages.len();
        info!("Rendered {} page(s) into {}", page_count, workdir.path().display());

        // ── Stream archive ───────────────────────────────────────────────
        scratch::schedule_removal(workdir.path().to_path_buf(), self.retention);
        let progress = or_noop(progress);
        let body = stream::from_blocking("pdf-to-images", move |out| {
            let result = write_page_archive(out, &pages, progress.as_ref());
            if let Err(e) = workdir.close() {
                warn!("Failed to remove rasteriser output: {}", e);
            }
            result
        });

        Ok(ConvertedOutput {
            filename,
            content_type: "application/zip",
            page_count,
            body,
        })
    }
}

/// PNG pages in `dir`, ordered by page number.
pub(crate) async fn list_rendered_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| DocConvError::storage(dir, e))?;

    let mut pages: Vec<(String, PathBuf)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DocConvError::storage(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(caps) = PAGE_FILE.captures(name) {
            pages.push((caps[1].to_string(), entry.path()));
        } else {
            debug!("Ignoring unexpected rasteriser output {}", name);
        }
    }

    order::sort_by_index(&mut pages, |(n, _)| n.as_str());
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}
