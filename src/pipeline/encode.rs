//! Image decoding and JPEG re-encoding for PDF pages.
//!
//! ## Why always re-encode to JPEG?
//!
//! PDF can embed baseline JPEG data unchanged through the `/DCTDecode`
//! filter, so a JPEG page needs no further compression work in the writer.
//! Re-encoding every input (PNG, JPEG, whatever the codec recognises) gives
//! one code path, applies the caller's `quality`, and bakes the EXIF
//! orientation into the pixels so phone photos are not shown sideways.
//!
//! Transparent pixels are composited onto white; JPEG has no alpha channel.

use crate::error::{DocConvError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation as ExifOrientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};
use std::io::{BufRead, Cursor, Seek};
use tracing::debug;

/// One page image, JPEG-encoded and upright.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Read only the image header and return its stored `(width, height)`.
///
/// Used as a cheap preflight check that the input is a recognised image.
pub fn probe_dimensions<R: BufRead + Seek>(reader: R) -> Result<(u32, u32)> {
    ImageReader::new(reader)
        .with_guessed_format()
        .map_err(|e| DocConvError::Conversion(format!("reading image header: {e}")))?
        .into_dimensions()
        .map_err(|e| DocConvError::Conversion(format!("unsupported or corrupt image: {e}")))
}

/// Decode `bytes`, apply EXIF orientation and re-encode as JPEG.
pub fn encode_page(bytes: &[u8], quality: u8) -> Result<EncodedPage> {
    let img = decode_upright(bytes)?;
    let rgb = flatten_onto_white(img);
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| DocConvError::Conversion(format!("JPEG encoding failed: {e}")))?;

    debug!(
        "Encoded {}x{} page → {} bytes JPEG (q={})",
        width,
        height,
        jpeg.len(),
        quality
    );
    Ok(EncodedPage {
        jpeg,
        width,
        height,
    })
}

fn decode_upright(bytes: &[u8]) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DocConvError::Conversion(format!("reading image: {e}")))?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| DocConvError::Conversion(format!("unsupported or corrupt image: {e}")))?;
    // Missing or unreadable EXIF means "as stored".
    let orientation = decoder
        .orientation()
        .unwrap_or(ExifOrientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)
        .map_err(|e| DocConvError::Conversion(format!("decoding image: {e}")))?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }
    let rgba = img.into_rgba8();
    let (w, h) = rgba.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn png(w: u32, h: u32, px: [u8; 4]) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(px)));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn probe_reads_header() {
        assert_eq!(probe_dimensions(Cursor::new(png(7, 3, [0, 0, 0, 255]))).unwrap(), (7, 3));
    }

    #[test]
    fn garbage_is_a_conversion_error() {
        let err = probe_dimensions(Cursor::new(b"definitely not an image")).unwrap_err();
        assert_eq!(err.code(), "conversion_error");
        assert!(encode_page(b"nope", 80).is_err());
    }

    #[test]
    fn png_becomes_jpeg_with_same_size() {
        let page = encode_page(&png(40, 20, [255, 0, 0, 255]), 80).unwrap();
        assert_eq!((page.width, page.height), (40, 20));
        assert_eq!(&page.jpeg[..2], &[0xFF, 0xD8]);
        let back = image::load_from_memory(&page.jpeg).unwrap();
        assert_eq!((back.width(), back.height()), (40, 20));
    }

    #[test]
    fn transparency_becomes_white() {
        let rgb = flatten_onto_white(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            1,
            1,
            Rgba([0, 0, 0, 0]),
        )));
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);

        let rgb = flatten_onto_white(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            1,
            1,
            Rgba([10, 20, 30, 255]),
        )));
        assert_eq!(rgb.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn lower_quality_is_smaller() {
        // A noisy image so quality actually matters.
        let img = RgbaImage::from_fn(64, 64, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) * 5 % 256) as u8, 255])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        let hi = encode_page(&buf, 95).unwrap();
        let lo = encode_page(&buf, 10).unwrap();
        assert!(lo.jpeg.len() < hi.jpeg.len());
    }
}
