use cluster_boxes::config::{ClustersConfig, DatasetConfig, load_json, save_json};
use cluster_boxes::core_modules::box_filter::corner_iou;
use cluster_boxes::{BoxFilter, DatasetIndexer, ImageDataset, ImageRasterizer, ParallelIndexer, SqliteStore};
use ndarray::Array3;
use serde_json::{Map, Value};
use std::path::Path;

fn dataset_config(dir: &Path, num_images: usize) -> DatasetConfig {
    DatasetConfig {
        data_dir: dir.to_path_buf(),
        name: "fixed-rectangles".into(),
        num_images,
        image_width: 96,
        image_height: 64,
        box_width: 8,
        box_height: 4,
        ..Default::default()
    }
}

fn clusters_config() -> ClustersConfig {
    ClustersConfig {
        num_clusters: 8,
        seed: 11,
        ..Default::default()
    }
}

#[test]
fn generated_dataset_reloads_with_a_valid_partition() {
    let dir = tempfile::tempdir().unwrap();
    let generated = DatasetIndexer::new(
        dataset_config(dir.path(), 12),
        clusters_config(),
        ImageRasterizer,
        SqliteStore::new(dir.path()),
    )
    .unwrap()
    .run()
    .unwrap();

    let dataset = ImageDataset::open(dir.path(), "fixed-rectangles", "train", 11).unwrap();
    assert_eq!(dataset.len(), 12);
    dataset.verify_partition().unwrap();

    let mut total = 0;
    for (i, record) in dataset.records().iter().enumerate() {
        assert_eq!(record.idx, i);
        assert_eq!(record.path, format!("fixed-rectangles/{i:05}.jpg"));
        assert!(dir.path().join(&record.path).is_file());

        let boxes = dataset.boxes_for(record.idx).unwrap();
        assert_eq!(boxes, generated.boxes_for(i).unwrap());
        for b in boxes {
            assert!(b.label < 8);
            assert!((b.width() - 8.0).abs() < 1e-3);
            assert!((b.height() - 4.0).abs() < 1e-3);
            let (cx, cy) = b.center();
            assert!((-1e-3..=96.001).contains(&cx) && (-1e-3..=64.001).contains(&cy));
        }
        total += boxes.len();
    }
    assert_eq!(total, dataset.boxes().len());

    let item = dataset.get(3).unwrap();
    assert_eq!(item.image.dim(), (3, 224, 224));
}

#[test]
fn regenerating_replaces_the_previous_tables() {
    let dir = tempfile::tempdir().unwrap();
    for num_images in [10, 4] {
        DatasetIndexer::new(
            dataset_config(dir.path(), num_images),
            clusters_config(),
            ImageRasterizer,
            SqliteStore::new(dir.path()),
        )
        .unwrap()
        .run()
        .unwrap();
    }

    let dataset = ImageDataset::open(dir.path(), "fixed-rectangles", "train", 11).unwrap();
    assert_eq!(dataset.len(), 4);
    dataset.verify_partition().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_generation_is_reproducible() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();

    let mut runs = Vec::new();
    for (dir, workers) in [(first_dir.path(), 2), (second_dir.path(), 5)] {
        let indexer = DatasetIndexer::new(
            dataset_config(dir, 16),
            clusters_config(),
            ImageRasterizer,
            SqliteStore::new(dir),
        )
        .unwrap();
        runs.push(ParallelIndexer::new(indexer).with_workers(workers).run().await.unwrap());
    }
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn filter_output_never_keeps_overlapping_survivors() {
    // Generated boxes turned into top-left detections, one jittered duplicate each.
    let dir = tempfile::tempdir().unwrap();
    let generated = DatasetIndexer::new(
        dataset_config(dir.path(), 3),
        clusters_config(),
        ImageRasterizer,
        SqliteStore::new(dir.path()),
    )
    .unwrap()
    .run()
    .unwrap();

    let n = (0..3).map(|i| generated.boxes_for(i).unwrap().len()).max().unwrap() * 2;
    let mut raw = Array3::<f32>::zeros((3, n, 6));
    for image in 0..3 {
        for (j, b) in generated.boxes_for(image).unwrap().iter().enumerate() {
            for (k, shift) in [0.0_f32, 0.5].into_iter().enumerate() {
                let row = 2 * j + k;
                raw[[image, row, 0]] = b.x1 + shift;
                raw[[image, row, 1]] = b.y1;
                raw[[image, row, 2]] = b.width();
                raw[[image, row, 3]] = b.height();
                raw[[image, row, 4]] = 0.9 - 0.1 * k as f32 - 0.001 * j as f32;
                raw[[image, row, 5]] = b.label as f32;
            }
        }
    }

    let filter = BoxFilter::default();
    let kept = filter.apply(raw.view()).unwrap();
    assert_eq!(kept.ncols(), 7);

    for image in 0..3 {
        let rows: Vec<[f32; 4]> = kept
            .rows()
            .into_iter()
            .filter(|r| r[6] == image as f32)
            .map(|r| [r[0], r[1], r[2], r[3]])
            .collect();
        assert!(rows.len() <= generated.boxes_for(image).unwrap().len());
        for (a, ra) in rows.iter().enumerate() {
            for rb in &rows[a + 1..] {
                assert!(corner_iou(*ra, *rb) <= filter.iou_threshold());
            }
        }
    }
    assert!(kept.column(4).iter().all(|&c| c > filter.conf_threshold()));
}

#[test]
fn saved_config_carries_overrides_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixed-rectangles-11.json");
    let clusters = clusters_config();

    let mut overrides = Map::new();
    overrides.insert("git_revision".into(), Value::String("dirty-abc123".into()));
    save_json(&path, &clusters, Some(&overrides)).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["git_revision"], "dirty-abc123");

    let reloaded: ClustersConfig = load_json(&path).unwrap();
    assert_eq!(reloaded, clusters);
}
