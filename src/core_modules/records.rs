// Typed rows of the three persisted tables and their conversion to and from
// the generic `Table` form. Column names are part of the on-disk schema:
//   dataset(idx, path, width, height, split, label)
//   boxes(x1, y1, x2, y2, label)
//   indices(start, length)

use serde::{Deserialize, Serialize};

use crate::core_modules::layout_builder::LabeledBox;
use crate::core_modules::tabular_store::{Table, Value};
use crate::error::StoreError;

pub const DATASET_TABLE: &str = "dataset";
pub const BOXES_TABLE: &str = "boxes";
pub const INDICES_TABLE: &str = "indices";

const DATASET_COLUMNS: [&str; 6] = ["idx", "path", "width", "height", "split", "label"];
const BOXES_COLUMNS: [&str; 5] = ["x1", "y1", "x2", "y2", "label"];
const INDICES_COLUMNS: [&str; 2] = ["start", "length"];

/// One generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Generation order; also the row of this image in the `indices` table.
    pub idx: usize,
    /// Image path relative to the dataset's data directory.
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub split: String,
    /// Image-level class. Always 0 for generated data.
    pub label: i64,
}

/// Half-open range `[start, start + length)` of one image's rows in the
/// flattened boxes table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub start: usize,
    pub length: usize,
}

impl IndexRecord {
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

pub fn images_to_table(records: &[ImageRecord]) -> Table {
    let mut table = Table::new(DATASET_COLUMNS);
    table.rows = records
        .iter()
        .map(|r| {
            vec![
                Value::Integer(r.idx as i64),
                Value::Text(r.path.clone()),
                Value::Integer(r.width as i64),
                Value::Integer(r.height as i64),
                Value::Text(r.split.clone()),
                Value::Integer(r.label),
            ]
        })
        .collect();
    table
}

pub fn images_from_table(table: &Table) -> Result<Vec<ImageRecord>, StoreError> {
    let [idx, path, width, height, split, label] = DATASET_COLUMNS.map(|c| table.column_index(c));
    let (idx, path, width, height, split, label) = (idx?, path?, width?, height?, split?, label?);

    table
        .rows
        .iter()
        .map(|row| {
            Ok(ImageRecord {
                idx: non_negative(&row[idx], "idx")?,
                path: text(&row[path], "path")?,
                width: dimension(&row[width], "width")?,
                height: dimension(&row[height], "height")?,
                split: text(&row[split], "split")?,
                label: integer(&row[label], "label")?,
            })
        })
        .collect()
}

pub fn boxes_to_table(boxes: &[LabeledBox]) -> Table {
    let mut table = Table::new(BOXES_COLUMNS);
    table.rows = boxes
        .iter()
        .map(|b| {
            vec![
                Value::from(b.x1),
                Value::from(b.y1),
                Value::from(b.x2),
                Value::from(b.y2),
                Value::Integer(b.label as i64),
            ]
        })
        .collect();
    table
}

pub fn boxes_from_table(table: &Table) -> Result<Vec<LabeledBox>, StoreError> {
    let [x1, y1, x2, y2, label] = BOXES_COLUMNS.map(|c| table.column_index(c));
    let (x1, y1, x2, y2, label) = (x1?, y1?, x2?, y2?, label?);

    table
        .rows
        .iter()
        .map(|row| {
            Ok(LabeledBox {
                x1: real(&row[x1], "x1")? as f32,
                y1: real(&row[y1], "y1")? as f32,
                x2: real(&row[x2], "x2")? as f32,
                y2: real(&row[y2], "y2")? as f32,
                label: non_negative(&row[label], "label")?,
            })
        })
        .collect()
}

pub fn indices_to_table(indices: &[IndexRecord]) -> Table {
    let mut table = Table::new(INDICES_COLUMNS);
    table.rows = indices
        .iter()
        .map(|r| vec![Value::Integer(r.start as i64), Value::Integer(r.length as i64)])
        .collect();
    table
}

pub fn indices_from_table(table: &Table) -> Result<Vec<IndexRecord>, StoreError> {
    let start = table.column_index("start")?;
    let length = table.column_index("length")?;
    table
        .rows
        .iter()
        .map(|row| {
            Ok(IndexRecord {
                start: non_negative(&row[start], "start")?,
                length: non_negative(&row[length], "length")?,
            })
        })
        .collect()
}

/// Checks that `indices` partition `0..total` exactly, in order.
pub fn check_partition(indices: &[IndexRecord], total: usize) -> Result<(), StoreError> {
    let mut expected = 0;
    for (i, record) in indices.iter().enumerate() {
        if record.start != expected {
            return Err(StoreError::Schema(format!(
                "index record {i} starts at {} but the previous range ended at {expected}",
                record.start
            )));
        }
        expected = record.end();
    }
    if expected != total {
        return Err(StoreError::Schema(format!(
            "index ranges cover {expected} boxes, table has {total}"
        )));
    }
    Ok(())
}

fn integer(value: &Value, column: &str) -> Result<i64, StoreError> {
    value
        .as_i64()
        .ok_or_else(|| StoreError::Schema(format!("column {column:?}: expected an integer, got {value:?}")))
}

fn non_negative(value: &Value, column: &str) -> Result<usize, StoreError> {
    let v = integer(value, column)?;
    usize::try_from(v).map_err(|_| StoreError::Schema(format!("column {column:?}: negative value {v}")))
}

fn dimension(value: &Value, column: &str) -> Result<u32, StoreError> {
    let v = integer(value, column)?;
    u32::try_from(v).map_err(|_| StoreError::Schema(format!("column {column:?}: {v} is not a valid image size")))
}

fn real(value: &Value, column: &str) -> Result<f64, StoreError> {
    value
        .as_f64()
        .ok_or_else(|| StoreError::Schema(format!("column {column:?}: expected a number, got {value:?}")))
}

fn text(value: &Value, column: &str) -> Result<String, StoreError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::Schema(format!("column {column:?}: expected text, got {value:?}")))
}
