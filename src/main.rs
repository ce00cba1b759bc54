//! cluster-boxes - synthetic box datasets and detection filtering
//!
//! Usage:
//!   cluster-boxes generate [--config cfg.json]   Generate and index a dataset
//!   cluster-boxes filter --input raw.json          Confidence gate + NMS over raw detections
//!   cluster-boxes inspect                         Verify a generated dataset

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cluster_boxes::config::{DATA_DIR, load_json, save_json};
use cluster_boxes::core_modules::tabular_store::dataset_key;
use cluster_boxes::reproducibility::git_revision;
use cluster_boxes::{
    BoxFilter, ClustersConfig, DatasetConfig, DatasetIndexer, ImageDataset, ImageRasterizer, ParallelIndexer,
    SqliteStore,
};

#[derive(Parser)]
#[command(name = "cluster-boxes", version, about = "Synthetic cluster-layout box datasets")]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, render and index a dataset
    Generate {
        /// JSON file with `dataset` and `clusters` sections
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        num_images: Option<usize>,
        #[arg(long)]
        num_clusters: Option<usize>,
        /// Worker count (defaults to the number of CPUs)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run the confidence gate and NMS over a `[B][N][C]` JSON array
    Filter {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 0.3)]
        conf: f32,
        #[arg(long, default_value_t = 0.3)]
        iou: f32,
        /// Defaults to stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Open a generated dataset and verify its index
    Inspect {
        #[arg(long, default_value = DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long, default_value = "fixed-rectangles")]
        name: String,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        #[arg(long, default_value = "train")]
        split: String,
    },
}

/// Everything a `generate` run needs; saved next to the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct GenerateConfig {
    dataset: DatasetConfig,
    clusters: ClustersConfig,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            clusters: ClustersConfig {
                num_clusters: 8,
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Generate {
            config,
            data_dir,
            name,
            seed,
            num_images,
            num_clusters,
            workers,
        } => {
            let mut cfg: GenerateConfig = match &config {
                Some(path) => {
                    load_json(path).with_context(|| format!("Failed to load config: {}", path.display()))?
                }
                None => GenerateConfig::default(),
            };
            if let Some(data_dir) = data_dir {
                cfg.dataset.data_dir = data_dir;
            }
            if let Some(name) = name {
                cfg.dataset.name = name;
            }
            if let Some(seed) = seed {
                cfg.clusters.seed = seed;
            }
            if let Some(num_images) = num_images {
                cfg.dataset.num_images = num_images;
            }
            if let Some(num_clusters) = num_clusters {
                cfg.clusters.num_clusters = num_clusters;
            }
            generate(cfg, workers).await
        }
        Commands::Filter {
            input,
            conf,
            iou,
            output,
        } => filter(input, conf, iou, output),
        Commands::Inspect {
            data_dir,
            name,
            seed,
            split,
        } => inspect(data_dir, &name, seed, &split),
    }
}

async fn generate(cfg: GenerateConfig, workers: Option<usize>) -> Result<()> {
    let data_dir = cfg.dataset.data_dir.clone();
    let key = dataset_key(&cfg.dataset.name, cfg.clusters.seed);

    let indexer = DatasetIndexer::new(
        cfg.dataset.clone(),
        cfg.clusters.clone(),
        ImageRasterizer,
        SqliteStore::new(&data_dir),
    )
    .context("Invalid generation config")?;
    let mut parallel = ParallelIndexer::new(indexer);
    if let Some(workers) = workers {
        parallel = parallel.with_workers(workers);
    }
    let dataset = parallel.run().await.context("Dataset generation failed")?;

    let mut overrides = Map::new();
    match std::env::current_dir().map_err(cluster_boxes::Error::from).and_then(|dir| git_revision(dir)) {
        Ok(revision) => {
            overrides.insert("git_revision".to_string(), Value::String(revision));
        }
        Err(e) => warn!("not recording a git revision: {e}"),
    }
    let config_path = data_dir.join(format!("{key}.json"));
    save_json(&config_path, &cfg, Some(&overrides))
        .with_context(|| format!("Failed to save config: {}", config_path.display()))?;

    info!(
        key = %key,
        images = dataset.images.len(),
        boxes = dataset.boxes.len(),
        config = %config_path.display(),
        "generation complete"
    );
    Ok(())
}

fn filter(input: PathBuf, conf: f32, iou: f32, output: Option<PathBuf>) -> Result<()> {
    let text =
        std::fs::read_to_string(&input).with_context(|| format!("Failed to read {}", input.display()))?;
    let raw: Vec<Vec<Vec<f32>>> =
        serde_json::from_str(&text).with_context(|| format!("Expected a [B][N][C] array in {}", input.display()))?;
    let batch = to_batch(&raw)?;

    let filter = BoxFilter::new(conf, iou)?;
    let kept = filter.apply(batch.view())?;
    info!(images = raw.len(), kept = kept.nrows(), "filtered detections");

    let rows: Vec<Vec<f32>> = kept.rows().into_iter().map(|r| r.to_vec()).collect();
    let json = serde_json::to_string_pretty(&rows)?;
    match output {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

/// Packs a nested `[B][N][C]` array into a tensor; every image must have the
/// same `N` and every row the same `C`.
fn to_batch(raw: &[Vec<Vec<f32>>]) -> Result<Array3<f32>> {
    let n = raw.first().map_or(0, Vec::len);
    let c = raw.iter().flatten().next().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(raw.len() * n * c);
    for (b, image) in raw.iter().enumerate() {
        if image.len() != n {
            bail!("image {b} has {} rows, expected {n}", image.len());
        }
        for (i, row) in image.iter().enumerate() {
            if row.len() != c {
                bail!("image {b} row {i} has {} columns, expected {c}", row.len());
            }
            flat.extend_from_slice(row);
        }
    }
    Ok(Array3::from_shape_vec((raw.len(), n, c), flat)?)
}

fn inspect(data_dir: PathBuf, name: &str, seed: u64, split: &str) -> Result<()> {
    let dataset = ImageDataset::open(&data_dir, name, split, seed)
        .with_context(|| format!("Failed to open dataset {} in {}", dataset_key(name, seed), data_dir.display()))?;
    dataset.verify_partition().context("Index table is inconsistent")?;

    let labels = dataset.boxes().iter().map(|b| b.label).max().map_or(0, |m| m + 1);
    info!(
        key = dataset.key(),
        split,
        images = dataset.len(),
        boxes = dataset.boxes().len(),
        labels,
        "dataset is consistent"
    );
    Ok(())
}
