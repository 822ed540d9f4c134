use crate::resources::ResourcePool;
use crate::types::{BoundingBox, ObjectFeatures, ShapeClass};
use image::RgbImage;

/// Gradient magnitude (0..255 luma units) above which a pixel counts as an edge.
pub const EDGE_THRESHOLD: f32 = 30.0;

/// Width/height ratio band treated as square.
pub const SQUARE_RATIO: (f32, f32) = (0.8, 1.25);
/// Beyond this elongation (either way) the box is irregular.
pub const MAX_REGULAR_RATIO: f32 = 3.0;

/// Crop rectangle in pixels, clamped to the image; at least 1x1.
fn crop_rect(img: &RgbImage, bbox: &BoundingBox) -> (u32, u32, u32, u32) {
    let px = bbox.to_pixels(img.dimensions());
    let x = (px.x.max(0.0) as u32).min(img.width().saturating_sub(1));
    let y = (px.y.max(0.0) as u32).min(img.height().saturating_sub(1));
    let x2 = ((px.x + px.width).ceil().max(0.0) as u32).min(img.width()).max(x + 1);
    let y2 = ((px.y + px.height).ceil().max(0.0) as u32).min(img.height()).max(y + 1);
    (x, y, x2 - x, y2 - y)
}

pub fn shape_class(width: f32, height: f32) -> ShapeClass {
    if width <= 0.0 || height <= 0.0 {
        return ShapeClass::Irregular;
    }
    let ratio = width / height;
    if ratio > MAX_REGULAR_RATIO || ratio < 1.0 / MAX_REGULAR_RATIO {
        ShapeClass::Irregular
    } else if ratio >= SQUARE_RATIO.0 && ratio <= SQUARE_RATIO.1 {
        ShapeClass::Square
    } else if ratio > SQUARE_RATIO.1 {
        ShapeClass::Horizontal
    } else {
        ShapeClass::Vertical
    }
}

/// Color, texture, size and shape of the region `bbox` covers in `img`.
///
/// The luma plane used for the edge pass is leased from `pool` and released
/// before returning.
pub fn extract_features(img: &RgbImage, bbox: &BoundingBox, pool: &ResourcePool) -> ObjectFeatures {
    let frame_area = (img.width() as f32 * img.height() as f32).max(1.0);
    let px_box = bbox.to_pixels(img.dimensions());
    let relative_size = (px_box.area() / frame_area).clamp(0.0, 1.0);
    let shape = shape_class(px_box.width, px_box.height);

    if img.width() == 0 || img.height() == 0 {
        return ObjectFeatures {
            average_color: [0, 0, 0],
            texture_score: 100.0,
            relative_size,
            shape,
        };
    }

    let (x, y, w, h) = crop_rect(img, bbox);
    let crop = image::imageops::crop_imm(img, x, y, w, h).to_image();

    let mut sum = [0u64; 3];
    let mut luma = pool.zeros_dyn(&[h as usize, w as usize]);
    for (cx, cy, p) in crop.enumerate_pixels() {
        sum[0] += p[0] as u64;
        sum[1] += p[1] as u64;
        sum[2] += p[2] as u64;
        luma[[cy as usize, cx as usize]] =
            0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
    }
    let count = (w as u64 * h as u64).max(1);
    let average_color = [
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
    ];

    let (rows, cols) = (h as usize, w as usize);
    let mut edges = 0usize;
    let mut samples = 0usize;
    for r in 0..rows.saturating_sub(1) {
        for c in 0..cols.saturating_sub(1) {
            let v = luma[[r, c]];
            let gx = luma[[r, c + 1]] - v;
            let gy = luma[[r + 1, c]] - v;
            if (gx * gx + gy * gy).sqrt() > EDGE_THRESHOLD {
                edges += 1;
            }
            samples += 1;
        }
    }
    let edge_density = if samples == 0 { 0.0 } else { edges as f32 / samples as f32 };

    ObjectFeatures {
        average_color,
        texture_score: ((1.0 - edge_density) * 100.0).clamp(0.0, 100.0),
        relative_size,
        shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::BufferLedger;

    #[test]
    fn shape_bands() {
        assert_eq!(shape_class(10.0, 10.0), ShapeClass::Square);
        assert_eq!(shape_class(20.0, 10.0), ShapeClass::Horizontal);
        assert_eq!(shape_class(10.0, 20.0), ShapeClass::Vertical);
        assert_eq!(shape_class(40.0, 10.0), ShapeClass::Irregular);
        assert_eq!(shape_class(0.0, 10.0), ShapeClass::Irregular);
    }

    #[test]
    fn flat_region_is_smooth_and_keeps_its_color() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "t");
        let img = RgbImage::from_pixel(100, 50, image::Rgb([120, 60, 30]));
        let f = extract_features(&img, &BoundingBox::normalized(0.0, 0.0, 0.5, 1.0), &pool);
        assert_eq!(f.average_color, [120, 60, 30]);
        assert_eq!(f.texture_score, 100.0);
        assert!((f.relative_size - 0.5).abs() < 1e-6);
        assert_eq!(f.shape, ShapeClass::Square);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn checkerboard_is_rough() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "t");
        let img = RgbImage::from_fn(20, 20, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        });
        let f = extract_features(&img, &BoundingBox::pixels(0.0, 0.0, 20.0, 20.0), &pool);
        assert!(f.texture_score < 5.0, "texture {}", f.texture_score);
    }

    #[test]
    fn box_outside_frame_is_clamped() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "t");
        let img = RgbImage::from_pixel(10, 10, image::Rgb([1, 2, 3]));
        let f = extract_features(&img, &BoundingBox::normalized(0.95, 0.95, 0.5, 0.5), &pool);
        assert_eq!(f.average_color, [1, 2, 3]);
    }
}
