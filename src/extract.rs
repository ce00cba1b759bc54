// THEORY:
// Feature extraction drives an external detector over a dataset. The crate does
// not ship a model: anything that maps a `[B, 3, H, W]` image batch to a
// `[B, N, C]` detection tensor can be plugged in through `Detector`. Each raw
// batch is immediately reduced by the `BoxFilter`, and the surviving rows of
// all batches are stacked into one `[M, C + 1]` table. The trailing column is
// the image's position within its own batch, exactly as the filter emits it.
//
// `extract_from_config` is the run-level entry point: the dataset, the batch
// size and both thresholds come from `Config`, and the stacked table is saved
// under `output_dir` as `{"data": rows}`. `extract_embeddings` skips the filter
// and keeps one flattened row of raw detections per image.

use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView4, Axis, concatenate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{Config, save_json};
use crate::core_modules::box_filter::BoxFilter;
use crate::core_modules::transforms::flatten;
use crate::dataset::ImageDataset;
use crate::error::{ConfigError, DetectorError, Result};

const PROGRESS_EVERY: usize = 16;

/// Anything that turns an image batch into raw detections.
pub trait Detector {
    /// `batch` is `[B, 3, H, W]`; the result must be `[B, N, C]` with
    /// top-left `x, y, w, h` and `conf` in the first five columns.
    fn detect(&mut self, batch: ArrayView4<f32>) -> std::result::Result<Array3<f32>, DetectorError>;
}

/// On-disk form of an extracted feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub data: Vec<Vec<f32>>,
}

impl From<&Array2<f32>> for FeatureTable {
    fn from(features: &Array2<f32>) -> Self {
        Self {
            data: features.rows().into_iter().map(|row| row.to_vec()).collect(),
        }
    }
}

/// `{output_dir}/{data_name}-{data_seed}-features.json`
pub fn features_path(config: &Config) -> PathBuf {
    config
        .output_dir
        .join(format!("{}-{}-features.json", config.data_name, config.data_seed))
}

/// Extracts filtered features for the dataset `config` names and saves them.
pub fn extract_from_config<D: Detector + ?Sized>(config: &Config, detector: &mut D) -> Result<Array2<f32>> {
    let dataset = ImageDataset::from_config(config)?;
    let filter = BoxFilter::from_config(config)?;
    let features = extract_features(&dataset, detector, &filter, config.data_batch_size)?;

    let path = features_path(config);
    save_json(&path, &FeatureTable::from(&features), None)?;
    info!("saved features to {}", path.display());
    Ok(features)
}

/// Runs `detector` over `dataset` in batches and filters every batch.
///
/// Returns an empty `[0, 0]` array for an empty dataset.
pub fn extract_features<D: Detector + ?Sized>(
    dataset: &ImageDataset,
    detector: &mut D,
    filter: &BoxFilter,
    batch_size: usize,
) -> Result<Array2<f32>> {
    let features = detect_batches(dataset, detector, batch_size, |batch_idx, raw| {
        let kept = filter.apply(raw.view())?;
        debug!(batch = batch_idx, raw = raw.len_of(Axis(1)), kept = kept.nrows(), "filtered batch");
        Ok(kept)
    })?;
    info!(rows = features.nrows(), "extracted features");
    Ok(features)
}

/// Raw detections flattened to one `[N * C]` row per image, in dataset order.
pub fn extract_embeddings<D: Detector + ?Sized>(
    dataset: &ImageDataset,
    detector: &mut D,
    batch_size: usize,
) -> Result<Array2<f32>> {
    detect_batches(dataset, detector, batch_size, |_, raw| Ok(flatten(raw)))
}

/// Feeds `dataset` to `detector` in batches, reduces each raw batch with
/// `reduce` and stacks the reduced batches.
fn detect_batches<D, F>(dataset: &ImageDataset, detector: &mut D, batch_size: usize, mut reduce: F) -> Result<Array2<f32>>
where
    D: Detector + ?Sized,
    F: FnMut(usize, Array3<f32>) -> Result<Array2<f32>>,
{
    if batch_size == 0 {
        return Err(ConfigError::TooSmall {
            name: "data_batch_size",
            min: 1.0,
            value: 0.0,
        }
        .into());
    }

    let total = dataset.len();
    let num_batches = total.div_ceil(batch_size);
    let (width, height) = dataset.input_size();
    info!(images = total, batches = num_batches, "extracting features");

    let mut reduced = Vec::with_capacity(num_batches);
    for (batch_idx, start) in (0..total).step_by(batch_size).enumerate() {
        let end = (start + batch_size).min(total);
        let mut batch = Array4::<f32>::zeros((end - start, 3, height as usize, width as usize));
        for (slot, i) in (start..end).enumerate() {
            let item = dataset.get(i)?;
            batch.index_axis_mut(Axis(0), slot).assign(&item.image);
        }

        let raw = detector.detect(batch.view())?;
        if raw.len_of(Axis(0)) != end - start {
            return Err(DetectorError::BatchSize {
                expected: end - start,
                got: raw.len_of(Axis(0)),
            }
            .into());
        }
        reduced.push(reduce(batch_idx, raw)?);

        if (batch_idx + 1) % PROGRESS_EVERY == 0 {
            info!("Extracting: {}/{}", batch_idx + 1, num_batches);
        }
    }

    if reduced.is_empty() {
        return Ok(Array2::zeros((0, 0)));
    }
    let views: Vec<ArrayView2<f32>> = reduced.iter().map(|a| a.view()).collect();
    let stacked = concatenate(Axis(0), &views)
        .map_err(|e| DetectorError::Inference(format!("detection width changed between batches: {e}")))?;
    Ok(stacked)
}
