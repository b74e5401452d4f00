//! Watermark rendering
//!
//! Lines are drawn with the 8x8 bitmap font from `font8x8`, scaled with
//! the image width, white on a translucent black band along the bottom
//! edge. Characters outside the basic set render as `?`.

use super::WatermarkLine;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, Pixel, Rgba, RgbaImage};

const GLYPH_SIZE: u32 = 8;

/// Image width covered by one unit of glyph scale
const WIDTH_PER_SCALE: u32 = 400;

const MAX_SCALE: u32 = 8;

const BAND_COLOR: Rgba<u8> = Rgba([0, 0, 0, 140]);

const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Render `lines` onto a copy of `image`, first line on top.
///
/// With no lines the result is an unmarked copy.
pub fn render(image: &DynamicImage, lines: &[WatermarkLine]) -> DynamicImage {
    let mut canvas = image.to_rgba8();
    if lines.is_empty() {
        return DynamicImage::ImageRgba8(canvas);
    }

    let (width, height) = canvas.dimensions();
    let scale = glyph_scale(width);
    let padding = 2 * scale;
    let line_height = GLYPH_SIZE * scale + padding;
    let band_height = (line_height * lines.len() as u32 + padding).min(height);
    let band_top = height - band_height;

    for y in band_top..height {
        for x in 0..width {
            canvas.get_pixel_mut(x, y).blend(&BAND_COLOR);
        }
    }

    for (index, line) in lines.iter().enumerate() {
        let top = band_top + padding + index as u32 * line_height;
        draw_text(&mut canvas, &line.text(), padding, top, scale);
    }

    DynamicImage::ImageRgba8(canvas)
}

fn glyph_scale(width: u32) -> u32 {
    (width / WIDTH_PER_SCALE).clamp(1, MAX_SCALE)
}

/// Draw `text` with its top-left corner at (`left`, `top`), clipped to the canvas
fn draw_text(canvas: &mut RgbaImage, text: &str, left: u32, top: u32, scale: u32) {
    let (width, height) = canvas.dimensions();
    let advance = GLYPH_SIZE * scale;

    for (index, ch) in text.chars().enumerate() {
        let origin_x = left.saturating_add((index as u32).saturating_mul(advance));
        if origin_x >= width {
            break;
        }
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if (bits >> col) & 1 == 0 {
                    continue;
                }
                let x0 = origin_x + col * scale;
                let y0 = top + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (x, y) = (x0 + dx, y0 + dy);
                        if x < width && y < height {
                            canvas.put_pixel(x, y, TEXT_COLOR);
                        }
                    }
                }
            }
        }
    }
}
