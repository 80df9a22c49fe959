//! Images → PDF: one page per image, input order preserved.
//!
//! ## Phases
//!
//! 1. **Validate** the request (no I/O).
//! 2. **Preflight** every source: registry keys must resolve and every image
//!    header must be readable. A bad input fails the whole request here,
//!    before any byte is sent.
//! 3. **Stream** on the blocking pool: for each source in order, decode,
//!    apply EXIF orientation, re-encode as JPEG, place it and append the
//!    page. Only one page is held in memory at a time.
//!
//! A failure in phase 3 (a file that decodes its header but not its pixels,
//! a disk error) truncates the stream: the PDF trailer is never written, so
//! the client never mistakes a partial document for a complete one.

use crate::config::{Orientation, PageSizePolicy};
use crate::error::{DocConvError, Result};
use crate::layout::compute_placement;
use crate::pipeline::encode::encode_page;
use crate::pipeline::pdf::PdfWriter;
use crate::pipeline::source::{resolve_images, ResolvedImage, SourceRef};
use crate::pipeline::{output_filename, ConvertedOutput};
use crate::progress::{or_noop, ProgressCallback};
use crate::registry::ArtifactRegistry;
use crate::stream;
use std::fmt;
use tracing::{debug, info};

pub const DEFAULT_PDF_NAME: &str = "converted.pdf";
pub const DEFAULT_QUALITY: u8 = 80;

/// Parameters of one images → PDF conversion.
#[derive(Clone)]
pub struct ImagesToPdfRequest {
    pub sources: Vec<SourceRef>,
    pub page_size: PageSizePolicy,
    pub orientation: Orientation,
    /// Margin in points on every side. Must be finite and ≥ 0.
    pub margin: f64,
    /// JPEG quality, 1–100.
    pub quality: u8,
    pub output_name: String,
    pub progress: Option<ProgressCallback>,
}

impl ImagesToPdfRequest {
    /// A request with default layout for `sources`.
    pub fn new(sources: Vec<SourceRef>) -> Self {
        Self {
            sources,
            page_size: PageSizePolicy::default(),
            orientation: Orientation::default(),
            margin: 0.0,
            quality: DEFAULT_QUALITY,
            output_name: DEFAULT_PDF_NAME.to_string(),
            progress: None,
        }
    }

    pub fn page_size(mut self, policy: PageSizePolicy) -> Self {
        self.page_size = policy;
        self
    }

    pub fn orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Check the request without touching any resource.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(DocConvError::Validation(
                "At least one image is required".into(),
            ));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(DocConvError::Validation(format!(
                "quality must be 1–100, got {}",
                self.quality
            )));
        }
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(DocConvError::Validation(format!(
                "margin must be a non-negative number, got {}",
                self.margin
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ImagesToPdfRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagesToPdfRequest")
            .field("sources", &self.sources)
            .field("page_size", &self.page_size)
            .field("orientation", &self.orientation)
            .field("margin", &self.margin)
            .field("quality", &self.quality)
            .field("output_name", &self.output_name)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Compose the request's images into a streamed PDF.
///
/// # Errors
/// Validation, missing-artifact and undecodable-header errors are returned
/// here; later failures surface as an `Err` item that ends the stream.
pub async fn images_to_pdf(
    registry: &ArtifactRegistry,
    request: ImagesToPdfRequest,
) -> Result<ConvertedOutput> {
    request.validate()?;
    let ImagesToPdfRequest {
        sources,
        page_size,
        orientation,
        margin,
        quality,
        output_name,
        progress,
    } = request;

    let filename = output_filename(&output_name, DEFAULT_PDF_NAME);
    info!(
        "Composing {} image(s) into '{}' (page size {}, quality {})",
        sources.len(),
        filename,
        page_size,
        quality
    );

    // ── Preflight ────────────────────────────────────────────────────────
    let images = resolve_images(registry, sources).await?;
    let images = tokio::task::spawn_blocking(move || preflight(images))
        .await
        .map_err(|e| DocConvError::Internal(format!("Preflight task panicked: {e}")))??;
    let total = images.len();

    // ── Stream ───────────────────────────────────────────────────────────
    let progress = or_noop(progress);
    let body = stream::from_blocking("images-to-pdf", move |out| {
        progress.on_conversion_start(total);
        let mut pdf = PdfWriter::new(out).map_err(write_error)?;
        for (i, image) in images.iter().enumerate() {
            let page_num = i + 1;
            progress.on_page_start(page_num, total);
            let page = match image.load().and_then(|bytes| encode_page(&bytes, quality)) {
                Ok(page) => page,
                Err(e) => {
                    progress.on_page_error(page_num, total, &e.to_string());
                    return Err(e);
                }
            };
            let placement =
                compute_placement(page_size, orientation, margin, page.width, page.height);
            pdf.add_image_page(&page, &placement).map_err(write_error)?;
            debug!(
                "Page {}/{}: {} ({}x{} px)",
                page_num,
                total,
                image.label(),
                page.width,
                page.height
            );
            progress.on_page_complete(page_num, total, page.jpeg.len());
        }
        pdf.finish().map_err(write_error)?;
        progress.on_conversion_complete(total, total);
        Ok(())
    });

    Ok(ConvertedOutput {
        filename,
        content_type: "application/pdf",
        page_count: total,
        body,
    })
}

fn preflight(images: Vec<ResolvedImage>) -> Result<Vec<ResolvedImage>> {
    for (i, image) in images.iter().enumerate() {
        image.probe().map_err(|e| match e {
            DocConvError::Conversion(msg) => {
                DocConvError::Conversion(format!("image {} ('{}'): {}", i + 1, image.label(), msg))
            }
            other => other,
        })?;
    }
    Ok(images)
}

fn write_error(e: std::io::Error) -> DocConvError {
    DocConvError::Conversion(format!("writing PDF: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::collect;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([0, 128, 255])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn registry() -> ArtifactRegistry {
        ArtifactRegistry::new(8, Duration::from_secs(60))
    }

    fn occurrences(pdf: &[u8], needle: &str) -> usize {
        String::from_utf8_lossy(pdf).matches(needle).count()
    }

    #[test]
    fn validation_rules() {
        let one = || ImagesToPdfRequest::new(vec![SourceRef::upload("a.png", png(1, 1))]);
        assert!(one().validate().is_ok());
        assert!(ImagesToPdfRequest::new(vec![]).validate().is_err());
        assert!(one().quality(0).validate().is_err());
        assert!(one().quality(101).validate().is_err());
        assert!(one().margin(-1.0).validate().is_err());
        assert!(one().margin(f64::INFINITY).validate().is_err());
    }

    #[tokio::test]
    async fn n_images_make_n_pages_in_order() {
        let request = ImagesToPdfRequest::new(vec![
            SourceRef::upload("a.png", png(100, 200)),
            SourceRef::upload("b.png", png(300, 100)),
            SourceRef::upload("c.png", png(50, 60)),
        ]);
        let out = images_to_pdf(&registry(), request).await.unwrap();
        assert_eq!(out.filename, "converted.pdf");
        assert_eq!(out.content_type, "application/pdf");
        assert_eq!(out.page_count, 3);

        let pdf = collect(out.body).await.unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
        assert!(pdf.ends_with(b"%%EOF\n"));
        assert_eq!(occurrences(&pdf, "/Type /Page "), 3);
        let text = String::from_utf8_lossy(&pdf);
        let a = text.find("/MediaBox [0 0 100 200]").unwrap();
        let b = text.find("/MediaBox [0 0 300 100]").unwrap();
        let c = text.find("/MediaBox [0 0 50 60]").unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn registry_keys_are_sources_too() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("staged.png");
        std::fs::write(&file, png(10, 20)).unwrap();
        let reg = registry();
        reg.register("k1", &file).await;

        let request = ImagesToPdfRequest::new(vec![SourceRef::key("k1")])
            .page_size(PageSizePolicy::Letter)
            .output_name("album.pdf");
        let out = images_to_pdf(&reg, request).await.unwrap();
        assert_eq!(out.filename, "album.pdf");
        let pdf = collect(out.body).await.unwrap();
        assert_eq!(occurrences(&pdf, "/MediaBox [0 0 612 792]"), 1);
    }

    #[tokio::test]
    async fn missing_key_fails_before_streaming() {
        let request = ImagesToPdfRequest::new(vec![
            SourceRef::upload("a.png", png(5, 5)),
            SourceRef::key("gone"),
        ]);
        let err = images_to_pdf(&registry(), request).await.unwrap_err();
        assert_eq!(err.code(), "missing_artifact");
    }

    #[tokio::test]
    async fn undecodable_image_fails_before_streaming() {
        let request = ImagesToPdfRequest::new(vec![
            SourceRef::upload("a.png", png(5, 5)),
            SourceRef::upload("notes.txt", b"hello".to_vec()),
        ]);
        let err = images_to_pdf(&registry(), request).await.unwrap_err();
        assert_eq!(err.code(), "conversion_error");
        assert!(err.to_string().contains("image 2"), "got: {err}");
    }

    #[tokio::test]
    async fn corrupt_pixels_truncate_the_stream() {
        // A valid PNG header followed by garbage: preflight passes, decoding fails.
        let noisy = RgbImage::from_fn(128, 128, |x, y| {
            Rgb([(x * 31 % 256) as u8, (y * 17 % 256) as u8, ((x * y) % 256) as u8])
        });
        let mut broken = Vec::new();
        DynamicImage::ImageRgb8(noisy)
            .write_to(&mut Cursor::new(&mut broken), ImageFormat::Png)
            .unwrap();
        let keep = broken.len() / 2;
        broken.truncate(keep);
        let request = ImagesToPdfRequest::new(vec![
            SourceRef::upload("ok.png", png(4, 4)),
            SourceRef::upload("broken.png", broken),
        ]);
        let out = images_to_pdf(&registry(), request).await.unwrap();
        assert!(collect(out.body).await.is_err());
    }

    #[tokio::test]
    async fn progress_events_follow_pages() {
        #[derive(Default)]
        struct Counter {
            pages: AtomicUsize,
            finished: AtomicUsize,
        }
        impl crate::ConversionProgressCallback for Counter {
            fn on_page_complete(&self, _page: usize, _total: usize, bytes: usize) {
                assert!(bytes > 0);
                self.pages.fetch_add(1, Ordering::SeqCst);
            }
            fn on_conversion_complete(&self, total: usize, ok: usize) {
                assert_eq!(total, ok);
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter::default());
        let request = ImagesToPdfRequest::new(vec![
            SourceRef::upload("a.png", png(3, 3)),
            SourceRef::upload("b.png", png(3, 3)),
        ])
        .progress_callback(counter.clone());
        let out = images_to_pdf(&registry(), request).await.unwrap();
        collect(out.body).await.unwrap();
        assert_eq!(counter.pages.load(Ordering::SeqCst), 2);
        assert_eq!(counter.finished.load(Ordering::SeqCst), 1);
    }
}
