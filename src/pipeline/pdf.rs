//! Minimal incremental PDF writer for image-only documents.
//!
//! Each page is written to the output as soon as it is added: one JPEG image
//! XObject (`/DCTDecode`, so the encoded bytes are embedded as-is), one
//! content stream that paints it, and the page dictionary. Only the page
//! tree, the catalog and the cross-reference table wait for
//! [`PdfWriter::finish`], so memory stays bounded by a single page.
//!
//! Object numbering:
//!
//! ```text
//! 1          catalog              (written by finish)
//! 2          page tree root       (written by finish)
//! 3 + 3k     page k image XObject
//! 4 + 3k     page k content stream
//! 5 + 3k     page k page object
//! ```
//!
//! A writer dropped without `finish` leaves a document without trailer,
//! which every reader rejects. That is the intended failure mode for a
//! stream that broke midway.

use crate::layout::Placement;
use crate::pipeline::encode::EncodedPage;
use std::io::{self, Write};

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const FIRST_FREE_ID: usize = 3;

/// Streaming writer producing a PDF 1.4 document with one image per page.
pub struct PdfWriter<W: Write> {
    out: W,
    offset: usize,
    /// Indexed by object id; slot 0 is the free object.
    offsets: Vec<usize>,
    next_id: usize,
    page_ids: Vec<usize>,
}

impl<W: Write> PdfWriter<W> {
    /// Start a document, writing the header immediately.
    pub fn new(out: W) -> io::Result<Self> {
        let mut w = Self {
            out,
            offset: 0,
            offsets: vec![0; FIRST_FREE_ID],
            next_id: FIRST_FREE_ID,
            page_ids: Vec::new(),
        };
        w.write_bytes(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n")?;
        Ok(w)
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.offset
    }

    /// Append one page showing `image` at `placement`.
    pub fn add_image_page(&mut self, image: &EncodedPage, placement: &Placement) -> io::Result<()> {
        let image_id = self.alloc_id();
        let content_id = self.alloc_id();
        let page_id = self.alloc_id();

        let image_dict = format!(
            "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
             /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>",
            image.width,
            image.height,
            image.jpeg.len()
        );
        self.write_stream_object(image_id, &image_dict, &image.jpeg)?;

        // PDF user space has its origin bottom-left.
        let y = placement.page_height - placement.draw_y - placement.draw_height;
        let content = format!(
            "q\n{} 0 0 {} {} {} cm\n/Im0 Do\nQ\n",
            num(placement.draw_width),
            num(placement.draw_height),
            num(placement.draw_x),
            num(y)
        );
        let content_dict = format!("<< /Length {} >>", content.len());
        self.write_stream_object(content_id, &content_dict, content.as_bytes())?;

        let page = format!(
            "<< /Type /Page /Parent {PAGES_ID} 0 R /MediaBox [0 0 {} {}] \
             /Resources << /XObject << /Im0 {image_id} 0 R >> >> /Contents {content_id} 0 R >>",
            num(placement.page_width),
            num(placement.page_height)
        );
        self.write_object(page_id, &page)?;
        self.page_ids.push(page_id);
        Ok(())
    }

    /// Write the page tree, catalog and trailer, and return the sink.
    pub fn finish(mut self) -> io::Result<W> {
        let kids = self
            .page_ids
            .iter()
            .map(|id| format!("{id} 0 R"))
            .collect::<Vec<_>>()
            .join(" ");
        let pages = format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids,
            self.page_ids.len()
        );
        self.write_object(PAGES_ID, &pages)?;
        self.write_object(
            CATALOG_ID,
            &format!("<< /Type /Catalog /Pages {PAGES_ID} 0 R >>"),
        )?;

        let total = self.next_id - 1;
        let xref_start = self.offset;
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", total + 1);
        for id in 1..=total {
            xref.push_str(&format!("{:010} 00000 n \n", self.offsets[id]));
        }
        self.write_bytes(xref.as_bytes())?;
        let trailer = format!(
            "trailer\n<< /Size {} /Root {CATALOG_ID} 0 R >>\nstartxref\n{}\n%%EOF\n",
            total + 1,
            xref_start
        );
        self.write_bytes(trailer.as_bytes())?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn alloc_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.offsets.push(0);
        id
    }

    fn write_object(&mut self, id: usize, body: &str) -> io::Result<()> {
        self.offsets[id] = self.offset;
        self.write_bytes(format!("{id} 0 obj\n").as_bytes())?;
        self.write_bytes(body.as_bytes())?;
        self.write_bytes(b"\nendobj\n")
    }

    fn write_stream_object(&mut self, id: usize, dict: &str, data: &[u8]) -> io::Result<()> {
        self.offsets[id] = self.offset;
        self.write_bytes(format!("{id} 0 obj\n{dict}\nstream\n").as_bytes())?;
        self.write_bytes(data)?;
        self.write_bytes(b"\nendstream\nendobj\n")
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.out.write_all(data)?;
        self.offset += data.len();
        Ok(())
    }
}

/// Format a coordinate with at most two decimals and no trailing zeros.
fn num(v: f64) -> String {
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
