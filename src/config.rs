// THEORY:
// Configuration is split by scope. `Config` describes a run (where data lives,
// which dataset to read, how to filter detections). `DatasetConfig` describes
// the on-disk shape of a generated dataset, and `ClustersConfig` the random
// layout that fills each image. All three deserialize from partial JSON, fall
// back to the defaults below, and are validated by whichever constructor
// consumes them, so an invalid value never reaches a sampling or filtering loop.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, Result};

pub const DATA_DIR: &str = "data";
pub const OUTPUT_DIR: &str = "output";

/// Run-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,

    // Data
    pub data_name: String,
    pub data_split: String,
    /// Fraction of the split to read, from the front.
    pub data_frac: f64,
    pub data_seed: u64,
    pub data_batch_size: usize,

    // Post-processing
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_DIR),
            output_dir: PathBuf::from(OUTPUT_DIR),
            data_name: "boxes".to_string(),
            data_split: "train".to_string(),
            data_frac: 1.0,
            data_seed: 7,
            data_batch_size: 32,
            conf_threshold: 0.3,
            iou_threshold: 0.3,
        }
    }
}

impl Config {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.data_frac > 0.0 && self.data_frac <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "data_frac",
                reason: format!("must lie in (0, 1], got {}", self.data_frac),
            });
        }
        at_least("data_batch_size", self.data_batch_size as f64, 1.0)?;
        not_empty("data_name", &self.data_name)?;
        not_empty("data_split", &self.data_split)?;
        unit_range("conf_threshold", self.conf_threshold as f64)?;
        unit_range("iou_threshold", self.iou_threshold as f64)?;
        Ok(())
    }
}

/// On-disk shape of a generated box dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub data_dir: PathBuf,
    pub name: String,
    pub num_images: usize,
    pub image_width: u32,
    pub image_height: u32,
    pub box_width: u32,
    pub box_height: u32,
    /// Value written to the `split` column of every image record.
    pub split: String,
    /// Extension of the rendered image files; picks the encoder.
    pub image_extension: String,
    pub background: [u8; 3],
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_DIR),
            name: "fixed-rectangles".to_string(),
            num_images: 1024,
            image_width: 640,
            image_height: 480,
            box_width: 40,
            box_height: 20,
            split: "train".to_string(),
            image_extension: "jpg".to_string(),
            background: [0, 0, 0],
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        not_empty("name", &self.name)?;
        if self.name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                name: "name",
                reason: format!("{:?} must not contain path separators", self.name),
            });
        }
        not_empty("split", &self.split)?;
        not_empty("image_extension", &self.image_extension)?;
        at_least("image_width", self.image_width as f64, 1.0)?;
        at_least("image_height", self.image_height as f64, 1.0)?;
        at_least("box_width", self.box_width as f64, 1.0)?;
        at_least("box_height", self.box_height as f64, 1.0)?;
        Ok(())
    }

    /// Directory holding the rendered images.
    pub fn root_dir(&self) -> PathBuf {
        self.data_dir.join(&self.name)
    }

    /// Path of image `idx`, relative to `data_dir`.
    pub fn relative_image_path(&self, idx: usize) -> PathBuf {
        PathBuf::from(&self.name).join(format!("{idx:05}.{}", self.image_extension))
    }
}

/// Shape of the random point clusters laid out in each image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClustersConfig {
    pub num_dims: usize,
    pub num_clusters: usize,
    /// Target total; only binding in exact-count mode.
    pub num_points: usize,

    /// Run seed. Keys the color palette and the dataset name; per-image
    /// randomness is seeded by the image index instead.
    pub seed: u64,

    pub cluster_mean_min: f64,
    pub cluster_mean_max: f64,
    pub cluster_std_min: f64,
    pub cluster_std_max: f64,

    /// Inclusive bounds on the number of points drawn per cluster.
    pub points_per_cluster_min: usize,
    pub points_per_cluster_max: usize,
}

impl Default for ClustersConfig {
    fn default() -> Self {
        Self {
            num_dims: 2,
            num_clusters: 4,
            num_points: 8 * 4,
            seed: 7,
            cluster_mean_min: -1.0,
            cluster_mean_max: 1.0,
            cluster_std_min: 0.1,
            cluster_std_max: 0.3,
            points_per_cluster_min: 2,
            points_per_cluster_max: 16,
        }
    }
}

impl ClustersConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        at_least("num_dims", self.num_dims as f64, 1.0)?;
        at_least("num_clusters", self.num_clusters as f64, 1.0)?;

        finite("cluster_mean_min", self.cluster_mean_min)?;
        finite("cluster_mean_max", self.cluster_mean_max)?;
        finite("cluster_std_min", self.cluster_std_min)?;
        finite("cluster_std_max", self.cluster_std_max)?;
        ordered(
            "cluster_mean_min",
            self.cluster_mean_min,
            "cluster_mean_max",
            self.cluster_mean_max,
        )?;
        at_least("cluster_std_min", self.cluster_std_min, 0.0)?;
        ordered(
            "cluster_std_min",
            self.cluster_std_min,
            "cluster_std_max",
            self.cluster_std_max,
        )?;
        ordered(
            "points_per_cluster_min",
            self.points_per_cluster_min as f64,
            "points_per_cluster_max",
            self.points_per_cluster_max as f64,
        )?;

        // Exact-count mode could never reach a positive target.
        if self.num_points > 0 && self.points_per_cluster_max == 0 {
            return Err(ConfigError::Invalid {
                name: "points_per_cluster_max",
                reason: format!("must be positive to reach num_points = {}", self.num_points),
            });
        }
        Ok(())
    }
}

fn at_least(name: &'static str, value: f64, min: f64) -> std::result::Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::TooSmall { name, min, value });
    }
    Ok(())
}

fn finite(name: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite { name, value });
    }
    Ok(())
}

fn ordered(
    min_name: &'static str,
    min: f64,
    max_name: &'static str,
    max: f64,
) -> std::result::Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::InvertedRange {
            min_name,
            max_name,
            min,
            max,
        });
    }
    Ok(())
}

pub(crate) fn unit_range(name: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfUnitRange { name, value });
    }
    Ok(())
}

fn not_empty(name: &'static str, value: &str) -> std::result::Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Writes `data` as pretty JSON, with `overrides` merged on top.
///
/// Overrides win on duplicate keys. `data` must serialize to a JSON object.
pub fn save_json<T: Serialize>(
    path: impl AsRef<Path>,
    data: &T,
    overrides: Option<&Map<String, Value>>,
) -> Result<()> {
    let path = path.as_ref();
    let mut object = match serde_json::to_value(data)? {
        Value::Object(map) => map,
        other => {
            return Err(ConfigError::Invalid {
                name: "data",
                reason: format!("expected a JSON object, got {other}"),
            }
            .into());
        }
    };

    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            object.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&Value::Object(object))?;
    std::fs::write(path, &text)?;
    debug!("saved config to {}", path.display());
    Ok(())
}

/// Reads a JSON config. Unknown keys (such as recorded overrides) are ignored.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&text)?;
    debug!("loaded config from {}", path.display());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
        DatasetConfig::default().validate().unwrap();
        ClustersConfig::default().validate().unwrap();
    }

    #[test]
    fn inverted_points_per_cluster_is_rejected() {
        let cfg = ClustersConfig {
            points_per_cluster_min: 5,
            points_per_cluster_max: 3,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvertedRange { min_name: "points_per_cluster_min", .. })
        ));
    }

    #[test]
    fn negative_std_is_rejected() {
        let cfg = ClustersConfig {
            cluster_std_min: -0.1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn thresholds_outside_unit_range_are_rejected() {
        let cfg = Config {
            iou_threshold: 1.5,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::OutOfUnitRange {
                name: "iou_threshold",
                value: 1.5
            })
        );
    }

    #[test]
    fn image_paths_are_relative_and_zero_padded() {
        let cfg = DatasetConfig::default();
        assert_eq!(
            cfg.relative_image_path(42),
            PathBuf::from("fixed-rectangles").join("00042.jpg")
        );
    }

    #[test]
    fn json_round_trip_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cfg.json");

        let mut overrides = Map::new();
        overrides.insert("data_seed".into(), Value::from(11));
        overrides.insert("git_revision".into(), Value::from("abc123"));
        save_json(&path, &Config::default(), Some(&overrides)).unwrap();

        let loaded: Config = load_json(&path).unwrap();
        assert_eq!(loaded.data_seed, 11);
        assert_eq!(loaded.data_name, "boxes");

        let raw: Value = load_json(&path).unwrap();
        assert_eq!(raw["git_revision"], "abc123");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: ClustersConfig = serde_json::from_str(r#"{"num_clusters": 8}"#).unwrap();
        assert_eq!(cfg.num_clusters, 8);
        assert_eq!(cfg.points_per_cluster_max, 16);
    }
}
