// THEORY:
// This file is the main entry point for the `cluster_boxes` library crate.
// It defines the public API that external consumers (the `cluster-boxes` CLI,
// training scripts) build on.
//
// The crate generates synthetic object-detection datasets: clustered random
// points become labeled rectangles, the rectangles are painted into images,
// and the images plus their boxes are indexed into three related tables. The
// same crate reads those datasets back and post-processes detector output with
// confidence gating and non-maximum suppression.
//
// `pipeline` and `parallel_pipeline` are the high-level generation entry
// points, `dataset` and `extract` the read side. The stateless building blocks
// live in `core_modules`.

pub mod config;
pub mod core_modules;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod reproducibility;

pub use config::{ClustersConfig, Config, DatasetConfig};
pub use core_modules::box_filter::BoxFilter;
pub use core_modules::canvas::{ImageRasterizer, Rasterizer};
pub use core_modules::cluster_sampler::{ClusterSampler, PointCloud};
pub use core_modules::layout_builder::LabeledBox;
pub use core_modules::tabular_store::{SqliteStore, TabularStore};
pub use dataset::{DatasetItem, ImageDataset};
pub use error::{Error, Result};
pub use extract::{Detector, extract_embeddings, extract_features, extract_from_config};
pub use parallel_pipeline::ParallelIndexer;
pub use pipeline::{DatasetIndexer, GeneratedDataset};
