//! Page geometry for placing one image on one page.
//!
//! ## Coordinates
//!
//! All values are PDF points (1/72 in). [`Placement`] uses a top-left
//! origin with `draw_y` growing downward; the PDF writer flips it into the
//! bottom-left user space when it emits the page content stream.
//!
//! ## Policies
//!
//! * `auto`: the page wraps the image plus the margin on every side. The
//!   image is never scaled and orientation is ignored.
//! * `a4` / `letter`: the preset page (landscape swaps its sides) minus the
//!   margins is the available box. Images larger than the box are scaled
//!   down uniformly, smaller ones are never enlarged, and the result is
//!   centred on the full page.

use crate::config::{Orientation, PageSizePolicy};

/// Where an image goes on its page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub page_width: f64,
    pub page_height: f64,
    pub draw_x: f64,
    pub draw_y: f64,
    pub draw_width: f64,
    pub draw_height: f64,
}

/// Compute the page size and image rectangle for a `width × height` image.
///
/// `margin` is clamped to ≥ 0 and zero-sized images are treated as 1×1, so
/// every returned value is finite and non-negative.
pub fn compute_placement(
    policy: PageSizePolicy,
    orientation: Orientation,
    margin: f64,
    width: u32,
    height: u32,
) -> Placement {
    let margin = if margin.is_finite() { margin.max(0.0) } else { 0.0 };
    let w = f64::from(width.max(1));
    let h = f64::from(height.max(1));

    let Some((short, long)) = policy.preset_points() else {
        return Placement {
            page_width: w + 2.0 * margin,
            page_height: h + 2.0 * margin,
            draw_x: margin,
            draw_y: margin,
            draw_width: w,
            draw_height: h,
        };
    };

    let (page_width, page_height) = match orientation {
        Orientation::Portrait => (short, long),
        Orientation::Landscape => (long, short),
    };

    let avail_w = (page_width - 2.0 * margin).max(0.0);
    let avail_h = (page_height - 2.0 * margin).max(0.0);
    let scale = (avail_w / w).min(avail_h / h).min(1.0);

    // Rounding must never push the image past the available box.
    let draw_width = (w * scale).round().min(avail_w.floor()).max(1.0);
    let draw_height = (h * scale).round().min(avail_h.floor()).max(1.0);

    Placement {
        page_width,
        page_height,
        draw_x: ((page_width - draw_width) / 2.0).max(0.0),
        draw_y: ((page_height - draw_height) / 2.0).max(0.0),
        draw_width,
        draw_height,
    }
}
