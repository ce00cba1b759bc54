// Shape-level tensor transforms: images into `[3, H, W]` float tensors for a
// detector, and batch flattening for downstream feature tables.

use image::RgbImage;
use image::imageops::{FilterType, resize};
use ndarray::{Array2, Array3};

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

/// Resizes to `width` x `height` and converts to a channel-first tensor in `[0, 1]`.
pub fn to_tensor(image: &RgbImage, width: u32, height: u32) -> Array3<f32> {
    let resized;
    let source = if image.dimensions() == (width, height) {
        image
    } else {
        resized = resize(image, width, height, FilterType::Triangle);
        &resized
    };

    Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
        source.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// `[B, N, D]` to `[B, N * D]`, row-major.
pub fn flatten(batch: Array3<f32>) -> Array2<f32> {
    let (b, n, d) = batch.dim();
    Array2::from_shape_fn((b, n * d), |(i, j)| batch[[i, j / d, j % d]])
}
