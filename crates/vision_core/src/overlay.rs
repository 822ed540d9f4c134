use crate::types::{AnalysisResult, BoundingBox};
use image::RgbImage;

const OBJECT_COLOR: [u8; 3] = [255, 0, 0];
const CONDITION_COLOR: [u8; 3] = [255, 255, 0];
const TEXT_COLOR: [u8; 3] = [0, 255, 0];

fn put(img: &mut RgbImage, x: i32, y: i32, color: [u8; 3]) {
    if x >= 0 && y >= 0 && x < img.width() as i32 && y < img.height() as i32 {
        img.put_pixel(x as u32, y as u32, image::Rgb(color));
    }
}

/// Outline of a pixel-space box.
fn draw_rect(img: &mut RgbImage, bbox: &BoundingBox, color: [u8; 3]) {
    let x1 = bbox.x.max(0.0).floor() as i32;
    let y1 = bbox.y.max(0.0).floor() as i32;
    let x2 = (bbox.x + bbox.width).min(img.width() as f32 - 1.0).ceil() as i32;
    let y2 = (bbox.y + bbox.height).min(img.height() as f32 - 1.0).ceil() as i32;

    for x in x1..=x2 {
        put(img, x, y1, color);
        put(img, x, y2, color);
    }
    for y in y1..=y2 {
        put(img, x1, y, color);
        put(img, x2, y, color);
    }
}

fn draw_point(img: &mut RgbImage, x: f32, y: f32, color: [u8; 3]) {
    let (xi, yi) = (x.round() as i32, y.round() as i32);
    for dy in -2..=2 {
        for dx in -2..=2 {
            put(img, xi + dx, yi + dy, color);
        }
    }
}

// 3x5 bitmap font; digits and '.' only, anything else is a blank cell.
fn glyph(ch: char) -> [u8; 5] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => [0; 5],
    }
}

fn draw_text(img: &mut RgbImage, x: f32, y: f32, text: &str, color: [u8; 3]) {
    let scale = 2;
    let mut cursor_x = x.round() as i32;
    let cursor_y = y.round() as i32;
    for ch in text.chars() {
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..3 {
                if (bits >> (2 - col)) & 1 == 1 {
                    for dy in 0..scale {
                        for dx in 0..scale {
                            put(
                                img,
                                cursor_x + col * scale + dx,
                                cursor_y + row as i32 * scale + dy,
                                color,
                            );
                        }
                    }
                }
            }
        }
        cursor_x += 4 * scale;
    }
}

/// Copy of `rgb` with object boxes (confidence underneath) and skin
/// condition boxes (severity underneath) drawn on it.
pub fn annotate(rgb: &RgbImage, result: &AnalysisResult) -> RgbImage {
    let mut annotated = rgb.clone();
    let dims = rgb.dimensions();

    for obj in &result.objects {
        let px = obj.bounding_box.to_pixels(dims);
        draw_rect(&mut annotated, &px, OBJECT_COLOR);
        let (cx, cy) = px.center();
        draw_point(&mut annotated, cx, cy, OBJECT_COLOR);
        draw_text(
            &mut annotated,
            px.x,
            px.y + px.height + 4.0,
            &format!("{:.2}", obj.confidence),
            TEXT_COLOR,
        );
    }

    for (i, cond) in result.skin_conditions.iter().enumerate() {
        let px = cond.location.bounding_box.to_pixels(dims);
        draw_rect(&mut annotated, &px, CONDITION_COLOR);
        // stack the labels so conditions sharing a box stay readable
        draw_text(
            &mut annotated,
            px.x + 2.0,
            px.y + 2.0 + i as f32 * 12.0,
            &format!("{:.0}", cond.severity),
            CONDITION_COLOR,
        );
    }
    annotated
}
