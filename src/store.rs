//! Append-only persistence of result rows.
//!
//! Every append reads the whole table, concatenates the new rows and writes
//! the whole table back in one atomic step. Concurrent writers are not
//! supported.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreError;
use crate::schema::Row;

/// Default SQLite table name.
pub const DEFAULT_TABLE: &str = "epochs";

/// A whole-table read/write backing.
pub trait TableStore {
    /// All rows in stored order, or `None` if the table does not exist yet.
    fn read_table(&self) -> Result<Option<Vec<Row>>, StoreError>;

    /// Replace the table's contents with `rows`.
    fn write_table(&self, rows: &[Row]) -> Result<(), StoreError>;
}

/// Append `rows` after the existing ones, creating the table if needed.
/// Returns the table's new row count.
///
/// Appending nothing never writes: an absent table stays absent.
pub fn append_rows<S: TableStore + ?Sized>(store: &S, rows: &[Row]) -> Result<usize, StoreError> {
    let existing = store.read_table()?;
    if rows.is_empty() {
        return Ok(existing.map_or(0, |t| t.len()));
    }
    let mut all = existing.unwrap_or_default();
    let existing = all.len();
    all.extend_from_slice(rows);
    store.write_table(&all)?;
    debug!(existing, appended = rows.len(), "appended rows");
    Ok(all.len())
}

/// Column names in first-seen order across `rows`.
fn column_names(rows: &[Row]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        for k in row.keys() {
            if !names.iter().any(|n| n == k) {
                names.push(k.clone());
            }
        }
    }
    names
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    /// Row-oriented SQLite table.
    #[default]
    Sqlite,
    /// Column-oriented JSON file.
    Columnar,
}

/// Open the store for `path` in the given format.
pub fn open_store(format: TableFormat, path: &Path) -> Result<Box<dyn TableStore>, StoreError> {
    Ok(match format {
        TableFormat::Sqlite => Box::new(SqliteTable::new(path, DEFAULT_TABLE)?),
        TableFormat::Columnar => Box::new(ColumnarFile::new(path)),
    })
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct SqliteTable {
    path: PathBuf,
    table: String,
}

impl SqliteTable {
    pub fn new<P: AsRef<Path>>(path: P, table: &str) -> Result<Self, StoreError> {
        let valid = !table.is_empty()
            && !table.starts_with(|c: char| c.is_ascii_digit())
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StoreError::InvalidTableName(table.to_string()));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            table: table.to_string(),
        })
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Connection::open(&self.path)?)
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(b.to_vec()),
    }
}

/// Declared SQLite type for a column, from its first non-null value.
fn affinity(rows: &[Row], column: &str) -> &'static str {
    let first = rows
        .iter()
        .filter_map(|r| r.get(column))
        .find(|v| !v.is_null());
    match first {
        Some(Value::Bool(_)) => "INTEGER",
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => "INTEGER",
        Some(Value::Number(_)) => "REAL",
        _ => "TEXT",
    }
}

impl TableStore for SqliteTable {
    fn read_table(&self) -> Result<Option<Vec<Row>>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = self.open()?;
        if !Self::table_exists(&conn, &self.table)? {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY rowid",
            quote_ident(&self.table)
        ))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map([], |r| {
                let mut row = Row::new();
                for (i, name) in names.iter().enumerate() {
                    row.insert(name.clone(), from_sql(r.get_ref(i)?));
                }
                Ok(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(rows))
    }

    fn write_table(&self, rows: &[Row]) -> Result<(), StoreError> {
        let mut conn = self.open()?;
        let columns = column_names(rows);
        let table = quote_ident(&self.table);

        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        if !columns.is_empty() {
            let decls: Vec<String> = columns
                .iter()
                .map(|c| format!("{} {}", quote_ident(c), affinity(rows, c)))
                .collect();
            tx.execute_batch(&format!("CREATE TABLE {table} ({})", decls.join(", ")))?;

            let placeholders = vec!["?"; columns.len()].join(", ");
            let cols = columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            {
                let mut insert =
                    tx.prepare(&format!("INSERT INTO {table} ({cols}) VALUES ({placeholders})"))?;
                for row in rows {
                    let values = columns
                        .iter()
                        .map(|c| row.get(c).map(to_sql).unwrap_or(SqlValue::Null));
                    insert.execute(params_from_iter(values))?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Columnar file
// ---------------------------------------------------------------------------

/// Column-oriented JSON layout:
///
/// ```json
/// {"num_rows": 2, "columns": {"epoch": [0, 1], "hostname": ["m3", null]}}
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct ColumnarTable {
    num_rows: usize,
    columns: Map<String, Value>,
}

pub struct ColumnarFile {
    path: PathBuf,
}

impl ColumnarFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TableStore for ColumnarFile {
    fn read_table(&self) -> Result<Option<Vec<Row>>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let table: ColumnarTable = serde_json::from_reader(reader)?;

        let mut rows = vec![Row::new(); table.num_rows];
        for (name, column) in table.columns {
            let Value::Array(values) = column else {
                return Err(StoreError::Malformed(format!("column {name:?} is not an array")));
            };
            if values.len() != table.num_rows {
                return Err(StoreError::Malformed(format!(
                    "column {name:?} has {} values, expected {}",
                    values.len(),
                    table.num_rows
                )));
            }
            for (row, v) in rows.iter_mut().zip(values) {
                row.insert(name.clone(), v);
            }
        }
        Ok(Some(rows))
    }

    fn write_table(&self, rows: &[Row]) -> Result<(), StoreError> {
        let mut columns = Map::new();
        for name in column_names(rows) {
            let values = rows
                .iter()
                .map(|r| r.get(&name).cloned().unwrap_or(Value::Null))
                .collect();
            columns.insert(name, Value::Array(values));
        }
        let table = ColumnarTable {
            num_rows: rows.len(),
            columns,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &table)?;
            writer.flush()?;
        }
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}
