// THEORY:
// The tabular store persists whole named tables under a dataset key. It is
// deliberately narrow: a table is written in one shot and replaces whatever was
// there before, and a table is read back in one shot in insertion order. There
// is no append mode and no partial update, which makes re-running a generation
// idempotent.
//
// `SqliteStore` keeps one SQLite file per dataset key under a root directory.
// Column types are inferred from the first row, mirroring how a data frame would
// be written. A table without columns is not an error: it is skipped with a
// warning.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Key of a persisted dataset: `{name}-{seed}`.
pub fn dataset_key(name: &str, seed: u64) -> String {
    format!("{name}-{seed}")
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    fn affinity(&self) -> &'static str {
        match self {
            Value::Null => "",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<SqlValue> for Value {
    fn from(v: SqlValue) -> Self {
        match v {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(r) => Value::Real(r),
            SqlValue::Text(t) => Value::Text(t),
            SqlValue::Blob(_) => Value::Null,
        }
    }
}

impl From<&Value> for SqlValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(*i),
            Value::Real(r) => SqlValue::Real(*r),
            Value::Text(t) => SqlValue::Text(t.clone()),
        }
    }
}

/// Named columns plus row-major cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), StoreError> {
        if row.len() != self.columns.len() {
            return Err(StoreError::Schema(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| StoreError::Schema(format!("missing column {name:?}")))
    }
}

/// Whole-table persistence keyed by dataset.
pub trait TabularStore {
    /// Writes `table` as `table_name`, replacing any previous content.
    fn save_table(&self, dataset_key: &str, table_name: &str, table: &Table) -> Result<(), StoreError>;

    fn load_table(&self, dataset_key: &str, table_name: &str) -> Result<Table, StoreError>;
}

/// One SQLite database per dataset key, stored as `{root}/{key}.db`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    root: PathBuf,
}

impl SqliteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn db_path(&self, dataset_key: &str) -> PathBuf {
        self.root.join(format!("{dataset_key}.db"))
    }

    pub fn exists(&self, dataset_key: &str) -> bool {
        self.db_path(dataset_key).is_file()
    }

    fn open(&self, path: &Path) -> Result<Connection, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Connection::open(path)?)
    }
}

impl TabularStore for SqliteStore {
    fn save_table(&self, dataset_key: &str, table_name: &str, table: &Table) -> Result<(), StoreError> {
        check_identifier(table_name)?;
        if table.columns.is_empty() {
            warn!(table = table_name, "cannot save a table without columns, skipping");
            return Ok(());
        }
        for column in &table.columns {
            check_identifier(column)?;
        }

        let path = self.db_path(dataset_key);
        let mut conn = self.open(&path)?;
        let tx = conn.transaction()?;

        tx.execute(&format!("DROP TABLE IF EXISTS \"{table_name}\""), [])?;

        let column_defs: Vec<String> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let affinity = table.rows.first().map(|r| r[i].affinity()).unwrap_or("");
                format!("\"{name}\" {affinity}").trim_end().to_string()
            })
            .collect();
        tx.execute(&format!("CREATE TABLE \"{table_name}\" ({})", column_defs.join(", ")), [])?;

        {
            let placeholders = vec!["?"; table.columns.len()].join(", ");
            let mut insert = tx.prepare(&format!("INSERT INTO \"{table_name}\" VALUES ({placeholders})"))?;
            for row in &table.rows {
                if row.len() != table.columns.len() {
                    return Err(StoreError::Schema(format!(
                        "row has {} cells, table {table_name:?} has {} columns",
                        row.len(),
                        table.columns.len()
                    )));
                }
                insert.execute(params_from_iter(row.iter().map(SqlValue::from)))?;
            }
        }
        tx.commit()?;

        info!(
            table = table_name,
            rows = table.rows.len(),
            path = %path.display(),
            "saved table"
        );
        Ok(())
    }

    fn load_table(&self, dataset_key: &str, table_name: &str) -> Result<Table, StoreError> {
        check_identifier(table_name)?;
        let path = self.db_path(dataset_key);
        if !path.is_file() {
            return Err(StoreError::NotFound(format!("database {}", path.display())));
        }
        let conn = Connection::open(&path)?;

        let present: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table_name],
            |row| row.get(0),
        )?;
        if !present {
            return Err(StoreError::NotFound(format!("table {table_name:?} in {}", path.display())));
        }

        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{table_name}\" ORDER BY rowid"))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i).map(Value::from))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!(table = table_name, rows = rows.len(), "loaded table");
        Ok(Table { columns, rows })
    }
}

fn check_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut table = Table::new(["idx", "path", "score"]);
        table
            .push_row(vec![Value::from(0_i64), Value::from("a.jpg"), Value::from(0.5_f64)])
            .unwrap();
        table
            .push_row(vec![Value::from(1_i64), Value::from("b.jpg"), Value::from(1.25_f64)])
            .unwrap();
        table
    }

    #[test]
    fn save_then_load_preserves_rows_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path());
        let table = sample_table();

        store.save_table("demo-7", "dataset", &table).unwrap();
        assert!(store.exists("demo-7"));
        assert_eq!(store.load_table("demo-7", "dataset").unwrap(), table);
    }

    #[test]
    fn saving_again_replaces_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path());
        store.save_table("demo-7", "dataset", &sample_table()).unwrap();

        let mut smaller = Table::new(["start", "length"]);
        smaller.push_row(vec![Value::from(0_i64), Value::from(3_i64)]).unwrap();
        store.save_table("demo-7", "dataset", &smaller).unwrap();

        assert_eq!(store.load_table("demo-7", "dataset").unwrap(), smaller);
    }

    #[test]
    fn empty_table_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path());
        store.save_table("demo-7", "dataset", &Table::default()).unwrap();
        assert!(!store.exists("demo-7"));
    }

    #[test]
    fn table_with_columns_but_no_rows_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path());
        let table = Table::new(["x1", "y1"]);
        store.save_table("demo-1", "boxes", &table).unwrap();
        assert_eq!(store.load_table("demo-1", "boxes").unwrap(), table);
    }

    #[test]
    fn missing_database_and_table_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path());
        assert!(matches!(
            store.load_table("absent-0", "dataset"),
            Err(StoreError::NotFound(_))
        ));

        store.save_table("demo-7", "dataset", &sample_table()).unwrap();
        assert!(matches!(
            store.load_table("demo-7", "boxes"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn hostile_table_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path());
        for name in ["", "1abc", "a b", "x\"; DROP TABLE y; --"] {
            assert!(matches!(
                store.save_table("demo-7", name, &sample_table()),
                Err(StoreError::InvalidTableName(_))
            ));
        }
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut table = Table::new(["a", "b"]);
        assert!(table.push_row(vec![Value::Null]).is_err());
    }

    #[test]
    fn dataset_key_joins_name_and_seed() {
        assert_eq!(dataset_key("fixed-rectangles", 7), "fixed-rectangles-7");
    }
}
