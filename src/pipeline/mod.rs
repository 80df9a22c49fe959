//! Conversion pipelines and their stages.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own. The two public pipelines are thin orchestration over them.
//!
//! ## Data Flow
//!
//! ```text
//! images → PDF
//!   source ──▶ preflight ──▶ encode ──▶ layout ──▶ pdf ──▶ ByteStream
//!   (upload/key) (headers)   (JPEG)    (placement) (pages)
//!
//! PDF → images
//!   source ──▶ probe ──▶ pdftoppm ──▶ archive ──▶ ByteStream
//!   (%PDF)    (cached)  (page-N.png)   (ZIP)
//! ```
//!
//! 1. [`source`]: resolve direct uploads and registry keys
//! 2. [`encode`]: decode, orient and JPEG-encode page images
//! 3. [`pdf`]: incremental PDF writer
//! 4. [`compose`]: images → PDF orchestration
//! 5. [`rasterize`]: PDF → PNG pages via the external rasteriser
//! 6. [`archive`]: streamed ZIP of page images

pub mod archive;
pub mod compose;
pub mod encode;
pub mod pdf;
pub mod rasterize;
pub mod source;

use crate::stream::ByteStream;
use crate::upload::sanitize_filename;
use std::fmt;

/// A conversion whose output is still being produced.
///
/// Every predictable failure has already been reported by the time this
/// value exists; `body` yields the document frame by frame.
pub struct ConvertedOutput {
    /// Attachment filename for the response.
    pub filename: String,
    /// MIME type of `body`.
    pub content_type: &'static str,
    /// Number of pages that will be written.
    pub page_count: usize,
    pub body: ByteStream,
}

impl fmt::Debug for ConvertedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertedOutput")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}

/// Sanitised attachment name, or `default` when the caller gave none.
pub(crate) fn output_filename(requested: &str, default: &str) -> String {
    if requested.trim().is_empty() {
        default.to_string()
    } else {
        sanitize_filename(requested.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_filename_defaults_and_sanitises() {
        assert_eq!(output_filename("", "converted.pdf"), "converted.pdf");
        assert_eq!(output_filename("  ", "pages.zip"), "pages.zip");
        assert_eq!(output_filename("../report.pdf", "x"), "report.pdf");
        assert_eq!(output_filename("my \"file\".pdf", "x"), "my__file_.pdf");
    }
}
