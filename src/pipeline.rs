// THEORY:
// The `pipeline` module is the top-level API for generating a dataset. The
// `DatasetIndexer` strings the stateless stages together for every image and
// then owns the one piece of sequential bookkeeping in the whole system: the
// running offset that turns per-image box lists into a flattened boxes table
// plus an index of `(start, length)` ranges.
//
// Per image `i` (seeded by `i` alone):
//   Stage 1: sample a point cloud            (ClusterSampler)
//   Stage 2: normalize and grow boxes        (LayoutBuilder)
//   Stage 3: paint the boxes and save        (Rasterizer)
//   Stage 4: describe the image              (ImageRecord)
// After all images:
//   Stage 5: accumulate offsets in image order and write the three tables.
//
// `generate_image` is a pure function of the index and the configuration, so
// images may be produced in any order or in parallel. `assemble` must receive
// them in index order.

use image::Rgb;
use std::path::Path;
use tracing::{debug, info};

use crate::config::{ClustersConfig, DatasetConfig};
use crate::core_modules::canvas::Rasterizer;
use crate::core_modules::cluster_sampler::ClusterSampler;
use crate::core_modules::layout_builder::{LabeledBox, normalize, to_boxes};
use crate::core_modules::palette::palette::distinct_colors;
use crate::core_modules::records::{
    BOXES_TABLE, DATASET_TABLE, INDICES_TABLE, ImageRecord, IndexRecord, boxes_to_table, images_to_table,
    indices_to_table,
};
use crate::core_modules::tabular_store::{TabularStore, dataset_key};
use crate::error::{ConfigError, Error, Result};

const PROGRESS_EVERY: usize = 128;

/// Everything produced for a single image.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub record: ImageRecord,
    pub boxes: Vec<LabeledBox>,
}

/// The three related tables of a dataset, in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedDataset {
    pub images: Vec<ImageRecord>,
    pub boxes: Vec<LabeledBox>,
    pub indices: Vec<IndexRecord>,
}

impl GeneratedDataset {
    /// Boxes belonging to the image at position `idx`.
    pub fn boxes_for(&self, idx: usize) -> Option<&[LabeledBox]> {
        self.indices.get(idx).map(|r| &self.boxes[r.range()])
    }
}

/// Generates, renders and indexes a cluster-layout box dataset.
pub struct DatasetIndexer<R: Rasterizer, S: TabularStore> {
    dataset: DatasetConfig,
    sampler: ClusterSampler,
    colors: Vec<Rgb<u8>>,
    rasterizer: R,
    store: S,
}

impl<R: Rasterizer, S: TabularStore> DatasetIndexer<R, S> {
    pub fn new(dataset: DatasetConfig, clusters: ClustersConfig, rasterizer: R, store: S) -> Result<Self> {
        dataset.validate()?;
        if clusters.num_dims < 2 {
            return Err(ConfigError::TooSmall {
                name: "num_dims",
                min: 2.0,
                value: clusters.num_dims as f64,
            }
            .into());
        }
        let sampler = ClusterSampler::new(clusters)?;
        let colors = distinct_colors(sampler.config().num_clusters, sampler.config().seed);
        Ok(Self {
            dataset,
            sampler,
            colors,
            rasterizer,
            store,
        })
    }

    pub fn dataset_config(&self) -> &DatasetConfig {
        &self.dataset
    }

    pub fn clusters_config(&self) -> &ClustersConfig {
        self.sampler.config()
    }

    /// Label-to-color mapping used for every image of this run.
    pub fn colors(&self) -> &[Rgb<u8>] {
        &self.colors
    }

    /// Key the tables are stored under: `{name}-{seed}`.
    pub fn dataset_key(&self) -> String {
        dataset_key(&self.dataset.name, self.sampler.config().seed)
    }

    /// Generates, renders and saves image `idx`.
    pub fn generate_image(&self, idx: usize) -> Result<GeneratedImage> {
        let cfg = &self.dataset;
        let (w, h) = (cfg.image_width, cfg.image_height);

        // Stage 1: Cluster Sampling
        let cloud = self.sampler.sample(idx as u64, false);

        // Stage 2: Layout
        let points = normalize(cloud.points, w, h).map_err(|source| Error::Layout { image: idx, source })?;
        let boxes = to_boxes(points.view(), &cloud.labels, cfg.box_width, cfg.box_height);

        // Stage 3: Rasterization
        let [r, g, b] = cfg.background;
        let mut canvas = self.rasterizer.new_canvas(w, h, Rgb([r, g, b]));
        for bx in &boxes {
            let [x1, y1, x2, y2] = bx.corners();
            self.rasterizer
                .draw_filled_rect(&mut canvas, x1, y1, x2, y2, self.colors[bx.label]);
        }
        let path = cfg.relative_image_path(idx);
        self.rasterizer.save(&canvas, &cfg.data_dir.join(&path))?;

        // Stage 4: Record
        let record = ImageRecord {
            idx,
            path: path_to_string(&path),
            width: w,
            height: h,
            split: cfg.split.clone(),
            label: 0,
        };
        debug!(idx, boxes = boxes.len(), path = %record.path, "generated image");

        Ok(GeneratedImage { record, boxes })
    }

    /// Flattens per-image results into the three tables.
    ///
    /// `images` must be in index order; this is the single place the running
    /// offset advances.
    pub fn assemble(images: Vec<GeneratedImage>) -> GeneratedDataset {
        let mut dataset = GeneratedDataset {
            images: Vec::with_capacity(images.len()),
            boxes: Vec::new(),
            indices: Vec::with_capacity(images.len()),
        };

        let mut offset = 0;
        for (position, image) in images.into_iter().enumerate() {
            debug_assert_eq!(image.record.idx, position, "images must arrive in index order");
            dataset.indices.push(IndexRecord {
                start: offset,
                length: image.boxes.len(),
            });
            offset += image.boxes.len();
            dataset.boxes.extend(image.boxes);
            dataset.images.push(image.record);
        }
        dataset
    }

    /// Writes the three tables, replacing any previous run with the same key.
    pub fn persist(&self, dataset: &GeneratedDataset) -> Result<()> {
        let key = self.dataset_key();
        self.store.save_table(&key, DATASET_TABLE, &images_to_table(&dataset.images))?;
        self.store.save_table(&key, BOXES_TABLE, &boxes_to_table(&dataset.boxes))?;
        self.store.save_table(&key, INDICES_TABLE, &indices_to_table(&dataset.indices))?;
        Ok(())
    }

    /// Generates every image in order, then persists the tables.
    pub fn run(&self) -> Result<GeneratedDataset> {
        let total = self.dataset.num_images;
        info!(key = %self.dataset_key(), images = total, "generating dataset");

        let mut images = Vec::with_capacity(total);
        for idx in 0..total {
            images.push(self.generate_image(idx)?);
            if (idx + 1) % PROGRESS_EVERY == 0 {
                info!("Generating: {}/{}", idx + 1, total);
            }
        }

        let dataset = Self::assemble(images);
        self.persist(&dataset)?;
        info!(
            images = dataset.images.len(),
            boxes = dataset.boxes.len(),
            "dataset written"
        );
        Ok(dataset)
    }
}

/// Persisted paths always use `/`.
fn path_to_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
