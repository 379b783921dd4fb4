//! Detection overlays.
//!
//! Boxes use the detection's raw pixel offsets. No correction is applied for an image
//! shown at a size other than its native one.

use image::{DynamicImage, Rgba, RgbaImage};

use crate::analysis::Detection;

pub const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const BOX_THICKNESS: u32 = 4;

// Edges are clamped to this magnitude so the pixel arithmetic below cannot overflow.
const EDGE_LIMIT: f64 = (1u64 << 31) as f64;

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub label: String,
}

impl OverlayBox {
    pub fn from_detection(detection: &Detection) -> Self {
        Self {
            left: detection.x,
            top: detection.y,
            width: detection.width,
            height: detection.height,
            label: detection.label(),
        }
    }
}

pub fn boxes(detections: &[Detection]) -> Vec<OverlayBox> {
    detections.iter().map(OverlayBox::from_detection).collect()
}

/// Copy of `image` with each box outlined. Parts falling outside the image are clipped.
pub fn annotate(image: &DynamicImage, boxes: &[OverlayBox]) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    for b in boxes {
        draw_outline(&mut canvas, b);
    }
    canvas
}

fn draw_outline(canvas: &mut RgbaImage, b: &OverlayBox) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    let left = edge(b.left);
    let top = edge(b.top);
    let right = edge(b.left + b.width);
    let bottom = edge(b.top + b.height);
    let t = BOX_THICKNESS as i64;

    let x0 = left.max(0);
    let x1 = right.min(w);
    let y0 = top.max(0);
    let y1 = bottom.min(h);

    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x < left + t || x >= right - t || y < top + t || y >= bottom - t;
            if on_edge {
                canvas.put_pixel(x as u32, y as u32, BOX_COLOR);
            }
        }
    }
}

/// NaN maps to 0.
fn edge(value: f64) -> i64 {
    value.round().clamp(-EDGE_LIMIT, EDGE_LIMIT) as i64
}
