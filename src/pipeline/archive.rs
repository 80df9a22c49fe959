//! Streamed ZIP of rendered page images.
//!
//! The archive is written with [`ZipWriter::new_stream`], which needs no
//! `Seek`: entry sizes go into data descriptors after each entry, so the
//! writer can feed a response body directly.

use crate::error::{DocConvError, Result};
use crate::progress::ConversionProgressCallback;
use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entry name of the `n`th page (1-based).
pub fn entry_name(page_num: usize) -> String {
    format!("page_{page_num}.png")
}

/// Write `pages`, in the given order, as `page_1.png … page_K.png`.
pub fn write_page_archive<W: Write>(
    out: W,
    pages: &[PathBuf],
    progress: &dyn ConversionProgressCallback,
) -> Result<()> {
    let total = pages.len();
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new_stream(out);

    progress.on_conversion_start(total);
    for (i, path) in pages.iter().enumerate() {
        let page_num = i + 1;
        progress.on_page_start(page_num, total);
        let copied = match append_file(&mut zip, &entry_name(page_num), path, options) {
            Ok(n) => n,
            Err(e) => {
                progress.on_page_error(page_num, total, &e.to_string());
                return Err(e);
            }
        };
        debug!("Archived {} as {} ({} bytes)", path.display(), entry_name(page_num), copied);
        progress.on_page_complete(page_num, total, copied as usize);
    }

    zip.finish()
        .map_err(|e| DocConvError::Conversion(format!("finalising ZIP: {e}")))?;
    progress.on_conversion_complete(total, total);
    Ok(())
}

fn append_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    path: &Path,
    options: SimpleFileOptions,
) -> Result<u64> {
    let mut file = File::open(path).map_err(|e| DocConvError::storage(path, e))?;
    zip.start_file(name, options)
        .map_err(|e| DocConvError::Conversion(format!("starting ZIP entry {name}: {e}")))?;
    io::copy(&mut file, zip)
        .map_err(|e| DocConvError::Conversion(format!("writing ZIP entry {name}: {e}")))
}
