// THEORY:
// The `LayoutBuilder` is the bridge between abstract cluster space and pixel space.
// It has two stateless jobs:
// 1.  **Normalization**: stretch one image's point cloud so its extent along each
//     axis fills the image, centered on the image center. The scale is computed
//     from the current image only, never from the dataset as a whole.
// 2.  **Boxing**: grow every point into a fixed-size axis-aligned box centered on
//     it, carrying the cluster label through unchanged.
//
// A cloud with zero extent along an axis cannot be stretched. That is reported
// as a `LayoutError` naming the axis instead of letting NaN or Inf leak into
// persisted coordinates.

use ndarray::{Array2, ArrayView2, Axis as NdAxis};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LayoutError;

/// Image axis, used to report which coordinate degenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => f.write_str("x"),
            Axis::Y => f.write_str("y"),
        }
    }
}

/// An axis-aligned box in pixel space, stored as corners, with its cluster label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: usize,
}

impl LabeledBox {
    /// A `width` x `height` box centered on `(cx, cy)`.
    pub fn centered(cx: f32, cy: f32, width: f32, height: f32, label: usize) -> Self {
        Self {
            x1: cx - width / 2.0,
            y1: cy - height / 2.0,
            x2: cx + width / 2.0,
            y2: cy + height / 2.0,
            label,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn corners(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Maps points into `[0, width] x [0, height]`, centered on the image center.
///
/// The first two columns are treated as `x` and `y`; further dimensions pass
/// through untouched.
pub fn normalize(mut points: Array2<f32>, width: u32, height: u32) -> Result<Array2<f32>, LayoutError> {
    if points.ncols() < 2 {
        return Err(LayoutError::TooFewDimensions {
            dims: points.ncols(),
        });
    }

    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;
    let scale_x = half_w / max_abs(&points, Axis::X)?;
    let scale_y = half_h / max_abs(&points, Axis::Y)?;

    for mut row in points.axis_iter_mut(NdAxis(0)) {
        row[0] = (row[0] as f64 * scale_x + half_w) as f32;
        row[1] = (row[1] as f64 * scale_y + half_h) as f32;
    }
    Ok(points)
}

fn max_abs(points: &Array2<f32>, axis: Axis) -> Result<f64, LayoutError> {
    let column = match axis {
        Axis::X => 0,
        Axis::Y => 1,
    };
    let max = points
        .column(column)
        .iter()
        .fold(0.0_f64, |acc, v| acc.max((*v as f64).abs()));

    // `f64::max` skips NaN, so look for it explicitly.
    if !max.is_finite() || points.column(column).iter().any(|v| v.is_nan()) {
        return Err(LayoutError::NonFinite { axis });
    }
    if max == 0.0 {
        return Err(LayoutError::ZeroExtent { axis });
    }
    Ok(max)
}

/// Grows every point into a `box_width` x `box_height` box centered on it.
pub fn to_boxes(points: ArrayView2<f32>, labels: &[usize], box_width: u32, box_height: u32) -> Vec<LabeledBox> {
    debug_assert_eq!(points.nrows(), labels.len());
    let (bw, bh) = (box_width as f32, box_height as f32);
    points
        .axis_iter(NdAxis(0))
        .zip(labels)
        .map(|(row, &label)| LabeledBox::centered(row[0], row[1], bw, bh, label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClustersConfig;
    use crate::core_modules::cluster_sampler::ClusterSampler;
    use ndarray::array;

    #[test]
    fn normalize_fills_the_image() {
        let points = array![[-2.0_f32, 1.0], [1.0, -0.5], [0.0, 0.0]];
        let out = normalize(points, 640, 480).unwrap();

        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[1, 0]], 480.0);
        assert_eq!(out[[2, 0]], 320.0);
        assert_eq!(out[[0, 1]], 480.0);
        assert_eq!(out[[1, 1]], 120.0);
        assert_eq!(out[[2, 1]], 240.0);
    }

    #[test]
    fn normalized_sampled_points_stay_in_bounds() {
        let sampler = ClusterSampler::new(ClustersConfig::default()).unwrap();
        for seed in 0..25 {
            let cloud = sampler.sample(seed, false);
            let out = normalize(cloud.points, 640, 480).unwrap();
            for row in out.rows() {
                assert!((-1e-3..=640.0 + 1e-3).contains(&row[0]), "x = {}", row[0]);
                assert!((-1e-3..=480.0 + 1e-3).contains(&row[1]), "y = {}", row[1]);
            }
        }
    }

    #[test]
    fn zero_extent_names_the_axis() {
        let points = array![[1.0_f32, 0.0], [-3.0, 0.0]];
        assert_eq!(
            normalize(points, 10, 10),
            Err(LayoutError::ZeroExtent { axis: Axis::Y })
        );

        let points = array![[0.0_f32, 1.0], [0.0, 2.0]];
        assert_eq!(
            normalize(points, 10, 10),
            Err(LayoutError::ZeroExtent { axis: Axis::X })
        );
    }

    #[test]
    fn nan_is_rejected() {
        let points = array![[1.0_f32, f32::NAN], [2.0, 1.0]];
        assert_eq!(
            normalize(points, 10, 10),
            Err(LayoutError::NonFinite { axis: Axis::Y })
        );
    }

    #[test]
    fn one_dimensional_points_are_rejected() {
        let points = array![[1.0_f32], [2.0]];
        assert_eq!(
            normalize(points, 10, 10),
            Err(LayoutError::TooFewDimensions { dims: 1 })
        );
    }

    #[test]
    fn boxes_are_centered_with_fixed_size() {
        let points = array![[100.0_f32, 50.0], [10.0, 20.0]];
        let boxes = to_boxes(points.view(), &[3, 1], 40, 20);

        assert_eq!(
            boxes[0],
            LabeledBox {
                x1: 80.0,
                y1: 40.0,
                x2: 120.0,
                y2: 60.0,
                label: 3
            }
        );
        assert_eq!(boxes[1].label, 1);
        assert_eq!(boxes[1].center(), (10.0, 20.0));
        assert!(boxes.iter().all(|b| b.x1 < b.x2 && b.y1 < b.y2));
        assert_eq!(boxes[1].width(), 40.0);
        assert_eq!(boxes[1].height(), 20.0);
    }
}
