// THEORY:
// `ImageDataset` is the read side of a generated dataset. It loads the three
// tables of one `{name}-{seed}` key, keeps the image records of a single split
// and serves them as `[3, H, W]` tensors. Because the boxes table carries no
// image column, per-image boxes are recovered only through the index table,
// which is why the partition can be checked on demand.

use ndarray::Array3;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::core_modules::canvas::load_rgb;
use crate::core_modules::layout_builder::LabeledBox;
use crate::core_modules::records::{
    BOXES_TABLE, DATASET_TABLE, INDICES_TABLE, ImageRecord, IndexRecord, boxes_from_table, check_partition,
    images_from_table, indices_from_table,
};
use crate::core_modules::tabular_store::{SqliteStore, TabularStore, dataset_key};
use crate::core_modules::transforms::{DEFAULT_INPUT_SIZE, to_tensor};
use crate::error::{ConfigError, Result, StoreError};

/// One decoded image with its metadata.
#[derive(Debug, Clone)]
pub struct DatasetItem {
    pub idx: usize,
    /// `[3, H, W]`, values in `[0, 1]`.
    pub image: Array3<f32>,
    pub label: i64,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ImageDataset {
    data_dir: PathBuf,
    key: String,
    records: Vec<ImageRecord>,
    /// Number of image records across all splits; one index row each.
    num_indexed: usize,
    boxes: Vec<LabeledBox>,
    indices: Vec<IndexRecord>,
    input_size: (u32, u32),
}

impl ImageDataset {
    /// Opens `{data_dir}/{name}-{seed}.db` and keeps the rows of `split`.
    pub fn open(data_dir: impl AsRef<Path>, name: &str, split: &str, seed: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let key = dataset_key(name, seed);
        let store = SqliteStore::new(&data_dir);
        if !store.exists(&key) {
            return Err(StoreError::NotFound(format!("dataset {}", store.db_path(&key).display())).into());
        }

        let all = images_from_table(&store.load_table(&key, DATASET_TABLE)?)?;
        let boxes = boxes_from_table(&store.load_table(&key, BOXES_TABLE)?)?;
        let indices = indices_from_table(&store.load_table(&key, INDICES_TABLE)?)?;

        let num_indexed = all.len();
        let records: Vec<ImageRecord> = all.into_iter().filter(|r| r.split == split).collect();
        info!(
            key = %key,
            split,
            images = records.len(),
            boxes = boxes.len(),
            "opened dataset"
        );

        Ok(Self {
            data_dir,
            key,
            records,
            num_indexed,
            boxes,
            indices,
            input_size: DEFAULT_INPUT_SIZE,
        })
    }

    /// Opens the dataset a run configuration points at, applying `data_frac`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let dataset = Self::open(&config.data_dir, &config.data_name, &config.data_split, config.data_seed)?;
        Ok(dataset.with_frac(config.data_frac)?)
    }

    /// Keeps the first `ceil(len * frac)` images.
    pub fn with_frac(mut self, frac: f64) -> std::result::Result<Self, ConfigError> {
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "data_frac",
                reason: format!("must lie in (0, 1], got {frac}"),
            });
        }
        let keep = (self.records.len() as f64 * frac).ceil() as usize;
        self.records.truncate(keep);
        debug!(key = %self.key, frac, images = self.records.len(), "subsampled dataset");
        Ok(self)
    }

    /// Size images are resized to by `get`.
    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width, height);
        self
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    /// Every box of the dataset, across all splits.
    pub fn boxes(&self) -> &[LabeledBox] {
        &self.boxes
    }

    /// Decodes the `i`-th image of the split.
    pub fn get(&self, i: usize) -> Result<DatasetItem> {
        let record = self.records.get(i).ok_or_else(|| {
            StoreError::NotFound(format!("item {i} of {} in {}", self.records.len(), self.key))
        })?;
        let rgb = load_rgb(&self.data_dir.join(&record.path))?;
        let (width, height) = self.input_size;
        Ok(DatasetItem {
            idx: record.idx,
            image: to_tensor(&rgb, width, height),
            label: record.label,
            path: record.path.clone(),
        })
    }

    /// Boxes of the image generated at index `idx`.
    pub fn boxes_for(&self, idx: usize) -> Option<&[LabeledBox]> {
        let range = self.indices.get(idx)?.range();
        self.boxes.get(range)
    }

    /// Checks that the index rows tile the boxes table, one row per image.
    pub fn verify_partition(&self) -> std::result::Result<(), StoreError> {
        if self.indices.len() != self.num_indexed {
            return Err(StoreError::Schema(format!(
                "{} index rows for {} images",
                self.indices.len(),
                self.num_indexed
            )));
        }
        check_partition(&self.indices, self.boxes.len())
    }
}
