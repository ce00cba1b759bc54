// THEORY:
// The `BoxFilter` turns the dense, redundant output of a detector into a short
// list of boxes per image. A detector emits a `[B, N, C]` batch where each row is
// `(x, y, w, h, confidence, ...)`; most rows are low-confidence noise and the
// confident ones come in overlapping clusters around each object.
//
// Per image, independently:
// 1.  **Confidence Gate**: drop rows at or below `conf_threshold`.
// 2.  **Corner Form**: rewrite `(x, y, w, h)` as `(x1, y1, x2, y2)`.
// 3.  **Greedy NMS**: visit the rows by descending confidence (stable on ties),
//     keep a row, discard every later row whose IoU with it exceeds
//     `iou_threshold`.
// 4.  **Tagging**: append the image's position in the batch as a trailing column.
//
// The per-image results are stacked in batch order into one `[M, C + 1]` table.
// The filter holds no state beyond its two thresholds, so one instance can be
// shared freely across threads and batches.

use ndarray::{Array2, ArrayView2, ArrayView3, Axis, s};
use std::cmp::Ordering;
use tracing::debug;

use crate::config::{Config, unit_range};
use crate::error::{ConfigError, FilterError};

/// Index of the confidence column in a raw detection row.
pub const CONFIDENCE_COLUMN: usize = 4;
/// Minimum row width: four box coordinates plus a confidence.
pub const MIN_COLUMNS: usize = 5;

/// Intersection-over-union of two `[x1, y1, x2, y2]` boxes.
///
/// Degenerate pairs with an empty union score `0.0`.
pub fn corner_iou(a: [f32; 4], b: [f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
}

/// Confidence gate followed by per-image greedy non-maximum suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxFilter {
    conf_threshold: f32,
    iou_threshold: f32,
}

impl Default for BoxFilter {
    fn default() -> Self {
        Self {
            conf_threshold: 0.3,
            iou_threshold: 0.3,
        }
    }
}

impl BoxFilter {
    pub fn new(conf_threshold: f32, iou_threshold: f32) -> Result<Self, ConfigError> {
        unit_range("conf_threshold", conf_threshold as f64)?;
        unit_range("iou_threshold", iou_threshold as f64)?;
        Ok(Self {
            conf_threshold,
            iou_threshold,
        })
    }

    /// Thresholds taken from the run-level configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(config.conf_threshold, config.iou_threshold)
    }

    pub fn conf_threshold(&self) -> f32 {
        self.conf_threshold
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    /// Filters a `[B, N, C]` batch into an `[M, C + 1]` table.
    ///
    /// Columns `0..4` of the output hold corner coordinates, column `4` the
    /// confidence, then the pass-through columns, and finally the image's
    /// index within the batch.
    pub fn apply(&self, batch: ArrayView3<f32>) -> Result<Array2<f32>, FilterError> {
        let columns = batch.len_of(Axis(2));
        if columns < MIN_COLUMNS {
            return Err(FilterError::ShapeMismatch {
                min_columns: MIN_COLUMNS,
                columns,
            });
        }

        let mut survivors = Vec::with_capacity(batch.len_of(Axis(0)));
        for (image, features) in batch.axis_iter(Axis(0)).enumerate() {
            let corners = to_corners(features);
            let kept = self.select(corners.view());
            debug!(image, candidates = features.nrows(), kept = kept.len(), "filtered image");
            survivors.push((corners, kept));
        }

        let total = survivors.iter().map(|(_, kept)| kept.len()).sum();
        let mut out = Array2::<f32>::zeros((total, columns + 1));
        let mut rows = out.axis_iter_mut(Axis(0));
        for (image, (corners, kept)) in survivors.iter().enumerate() {
            for (&source, mut target) in kept.iter().zip(rows.by_ref()) {
                target.slice_mut(s![..columns]).assign(&corners.row(source));
                target[columns] = image as f32;
            }
        }
        Ok(out)
    }

    /// Indices of the rows of one image that survive the gate and NMS, in
    /// descending confidence order.
    ///
    /// `corners` must already be in corner form.
    pub fn select(&self, corners: ArrayView2<f32>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..corners.nrows())
            .filter(|&i| corners[[i, CONFIDENCE_COLUMN]] > self.conf_threshold)
            .collect();

        // `sort_by` is stable, so equal confidences keep their input order.
        order.sort_by(|&a, &b| {
            corners[[b, CONFIDENCE_COLUMN]]
                .partial_cmp(&corners[[a, CONFIDENCE_COLUMN]])
                .unwrap_or(Ordering::Equal)
        });

        let boxes: Vec<[f32; 4]> = (0..corners.nrows())
            .map(|i| [corners[[i, 0]], corners[[i, 1]], corners[[i, 2]], corners[[i, 3]]])
            .collect();

        let mut keep = Vec::with_capacity(order.len());
        let mut suppressed = vec![false; order.len()];
        for (rank, &current) in order.iter().enumerate() {
            if suppressed[rank] {
                continue;
            }
            keep.push(current);
            for (later, &candidate) in order.iter().enumerate().skip(rank + 1) {
                if !suppressed[later] && corner_iou(boxes[current], boxes[candidate]) > self.iou_threshold {
                    suppressed[later] = true;
                }
            }
        }
        keep
    }
}

/// Copies one image's rows with `(x, y, w, h)` rewritten as `(x1, y1, x2, y2)`.
fn to_corners(features: ArrayView2<f32>) -> Array2<f32> {
    let mut corners = features.to_owned();
    let mut far = corners.slice_mut(s![.., 2..4]);
    far += &features.slice(s![.., 0..2]);
    corners
}
