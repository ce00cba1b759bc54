// THEORY:
// The `canvas` module is the only place that knows how pixels are produced.
// Everything upstream speaks in floating-point boxes and RGB colors; the
// `Rasterizer` trait turns those into an image and writes it to disk. The
// indexer is generic over the trait, so tests can swap in a recorder and never
// touch an encoder.
//
// `ImageRasterizer` is the production implementation: an `image::RgbImage`
// canvas, filled rectangles via `imageproc`, and an encoder chosen from the
// file extension.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;

use crate::error::RasterError;

/// Produces and persists raster images made of filled rectangles.
pub trait Rasterizer {
    type Canvas;

    fn new_canvas(&self, width: u32, height: u32, background: Rgb<u8>) -> Self::Canvas;

    /// Fills the rectangle spanning corners `(x1, y1)` and `(x2, y2)`.
    fn draw_filled_rect(&self, canvas: &mut Self::Canvas, x1: f32, y1: f32, x2: f32, y2: f32, color: Rgb<u8>);

    fn save(&self, canvas: &Self::Canvas, path: &Path) -> Result<(), RasterError>;
}

/// Rasterizer backed by `image` and `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRasterizer;

impl Rasterizer for ImageRasterizer {
    type Canvas = RgbImage;

    fn new_canvas(&self, width: u32, height: u32, background: Rgb<u8>) -> RgbImage {
        RgbImage::from_pixel(width, height, background)
    }

    fn draw_filled_rect(&self, canvas: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, color: Rgb<u8>) {
        if let Some(rect) = pixel_rect(x1, y1, x2, y2) {
            // Clipped to the canvas by imageproc.
            draw_filled_rect_mut(canvas, rect, color);
        }
    }

    fn save(&self, canvas: &RgbImage, path: &Path) -> Result<(), RasterError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        canvas.save(path).map_err(|source| RasterError::Encode {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Rounds corners to the nearest pixel. Both corner pixels are covered, so a
/// box from `10.0` to `50.0` fills 41 columns. Returns `None` for non-finite
/// input.
fn pixel_rect(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Rect> {
    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (left, right) = (x1.min(x2).round() as i64, x1.max(x2).round() as i64);
    let (top, bottom) = (y1.min(y2).round() as i64, y1.max(y2).round() as i64);

    let width = u32::try_from(right - left + 1).ok()?;
    let height = u32::try_from(bottom - top + 1).ok()?;
    let left = i32::try_from(left).ok()?;
    let top = i32::try_from(top).ok()?;
    Some(Rect::at(left, top).of_size(width, height))
}

/// Reads any supported image from disk as RGB8.
pub fn load_rgb(path: &Path) -> Result<RgbImage, RasterError> {
    let image = image::open(path).map_err(|source| RasterError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangles_are_filled_inclusively() {
        let r = ImageRasterizer;
        let mut canvas = r.new_canvas(20, 10, Rgb([0, 0, 0]));
        r.draw_filled_rect(&mut canvas, 2.0, 3.0, 5.0, 4.0, Rgb([255, 0, 0]));

        assert_eq!(*canvas.get_pixel(2, 3), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(5, 4), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(6, 4), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(1, 3), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(3, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn rectangles_are_clipped_to_the_canvas() {
        let r = ImageRasterizer;
        let mut canvas = r.new_canvas(10, 10, Rgb([0, 0, 0]));
        r.draw_filled_rect(&mut canvas, -20.0, -5.0, 2.0, 2.0, Rgb([0, 255, 0]));
        r.draw_filled_rect(&mut canvas, 8.0, 8.0, 40.0, 40.0, Rgb([0, 0, 255]));
        r.draw_filled_rect(&mut canvas, f32::NAN, 0.0, 1.0, 1.0, Rgb([9, 9, 9]));

        assert_eq!(*canvas.get_pixel(0, 0), Rgb([0, 255, 0]));
        assert_eq!(*canvas.get_pixel(9, 9), Rgb([0, 0, 255]));
        assert_eq!(*canvas.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn saved_png_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("canvas.png");

        let r = ImageRasterizer;
        let mut canvas = r.new_canvas(16, 8, Rgb([0, 0, 0]));
        r.draw_filled_rect(&mut canvas, 4.0, 2.0, 9.0, 5.0, Rgb([10, 200, 30]));
        r.save(&canvas, &path).unwrap();

        let loaded = load_rgb(&path).unwrap();
        assert_eq!(loaded, canvas);
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = load_rgb(Path::new("does/not/exist.png")).unwrap_err();
        assert!(matches!(err, RasterError::Decode { .. }));
    }
}
