//! Progress-callback trait for per-page conversion events.
//!
//! Attach an [`Arc<dyn ConversionProgressCallback>`] to an
//! [`ImagesToPdfRequest`](crate::ImagesToPdfRequest) or a
//! [`PdfToImagesRequest`](crate::PdfToImagesRequest) to receive events as
//! the streaming task writes each page.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a terminal progress bar, a log line or a metrics
//! counter without the library knowing how the host application reports
//! progress. Pages are written on the blocking pool, so the trait is
//! `Send + Sync`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docconv::{ConversionProgressCallback, ImagesToPdfRequest, SourceRef};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, bytes: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, bytes);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//! let request = ImagesToPdfRequest::new(vec![SourceRef::key("0123abcd")])
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>);
//! assert!(request.validate().is_ok());
//! ```

use std::sync::Arc;

/// Called by the conversion pipelines as they write each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events for one conversion arrive in page order from
/// a single blocking thread; different conversions may call the same
/// callback concurrently.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, right before the first page is written.
    ///
    /// # Arguments
    /// * `total_pages`: number of pages that will be processed
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page is decoded or read from disk.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: total pages in the document
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been written to the output.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: total pages
    /// * `bytes`: encoded size of the page (JPEG in a PDF, PNG in a ZIP)
    fn on_page_complete(&self, page_num: usize, total_pages: usize, bytes: usize) {
        let _ = (page_num, total_pages, bytes);
    }

    /// Called when a page fails. The conversion stops after this event.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: total pages
    /// * `error`: human-readable error description
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the last page, when the output is complete.
    ///
    /// # Arguments
    /// * `total_pages`: total pages in the document
    /// * `success_count`: pages written
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored on conversion requests.
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

pub(crate) fn or_noop(callback: Option<ProgressCallback>) -> ProgressCallback {
    callback.unwrap_or_else(|| Arc::new(NoopProgressCallback))
}
