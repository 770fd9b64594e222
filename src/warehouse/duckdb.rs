//! DuckDB warehouse backend

use std::path::{Path, PathBuf};

use duckdb::Connection;
use duckdb::types::ValueRef;
use serde_json::Value;

use super::{Warehouse, WarehouseError, WarehouseResult, ensure_parent};
use crate::rowset::{ColumnInfo, Row, RowSet};

/// Column types read natively; everything else is read as VARCHAR
const NATIVE_TYPES: &[&str] = &[
    "BOOLEAN",
    "TINYINT",
    "SMALLINT",
    "INTEGER",
    "BIGINT",
    "UTINYINT",
    "USMALLINT",
    "UINTEGER",
    "UBIGINT",
    "FLOAT",
    "DOUBLE",
];

/// DuckDB warehouse stored in a single database file
///
/// A connection is opened for each operation and dropped when it completes,
/// so the file is never held open between pipeline stages.
#[derive(Debug, Clone)]
pub struct DuckDbWarehouse {
    db_path: PathBuf,
}

impl DuckDbWarehouse {
    /// Create a warehouse backed by the database file at `db_path`
    ///
    /// The file is created on first use.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Get the database file path
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> WarehouseResult<Connection> {
        ensure_parent(&self.db_path)?;
        Connection::open(&self.db_path).map_err(|e| {
            WarehouseError::ConnectionFailed(format!(
                "Failed to open DuckDB at {}: {}",
                self.db_path.display(),
                e
            ))
        })
    }

    /// Execute one or more SQL statements against the warehouse
    pub fn execute_batch(&self, sql: &str) -> WarehouseResult<()> {
        let conn = self.connect()?;
        tracing::debug!("Executing SQL: {}", sql);
        conn.execute_batch(sql)
            .map_err(|e| WarehouseError::QueryFailed(format!("Batch execute failed: {}", e)))
    }

    fn count_rows(conn: &Connection, table: &str) -> WarehouseResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| WarehouseError::QueryFailed(format!("Count failed: {}", e)))?;
        Ok(count.max(0) as usize)
    }
}

impl Warehouse for DuckDbWarehouse {
    fn replace_from_delimited(
        &self,
        table: &str,
        file: &Path,
        delimiter: char,
    ) -> WarehouseResult<usize> {
        if !file.is_file() {
            return Err(WarehouseError::InvalidInput(format!(
                "Delimited file not found: {}",
                file.display()
            )));
        }

        let conn = self.connect()?;
        let sql = format!(
            "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv('{}', delim = '{}', header = true)",
            quote_ident(table),
            escape_literal(&file.to_string_lossy()),
            escape_literal(&delimiter.to_string())
        );
        tracing::debug!("Executing SQL: {}", sql);
        conn.execute_batch(&sql).map_err(|e| {
            WarehouseError::QueryFailed(format!(
                "Failed to load {} into {}: {}",
                file.display(),
                table,
                e
            ))
        })?;

        Self::count_rows(&conn, table)
    }

    fn read_table(&self, table: &str) -> WarehouseResult<RowSet> {
        let conn = self.connect()?;
        query_relation(&conn, &quote_ident(table))
            .map_err(|e| WarehouseError::QueryFailed(format!("Failed to read {}: {}", table, e)))
    }

    fn export_delimited(
        &self,
        table: &str,
        file: &Path,
        delimiter: char,
    ) -> WarehouseResult<usize> {
        ensure_parent(file)?;

        let conn = self.connect()?;
        let sql = format!(
            "COPY {} TO '{}' (HEADER, DELIMITER '{}')",
            quote_ident(table),
            escape_literal(&file.to_string_lossy()),
            escape_literal(&delimiter.to_string())
        );
        tracing::debug!("Executing SQL: {}", sql);
        conn.execute_batch(&sql).map_err(|e| {
            WarehouseError::QueryFailed(format!("Failed to export {}: {}", table, e))
        })?;

        Self::count_rows(&conn, table)
    }
}

/// Quote an identifier for DuckDB
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a value for use inside a single-quoted SQL string
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Describe the columns of a relation (`FROM` clause expression)
fn describe_relation(conn: &Connection, relation: &str) -> duckdb::Result<Vec<ColumnInfo>> {
    let sql = format!("DESCRIBE SELECT * FROM {}", relation);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let data_type: String = row.get(1)?;
        columns.push(ColumnInfo::new(name, data_type));
    }

    Ok(columns)
}

/// Read every row of a relation into a row set
///
/// Columns keep their reported SQL types; values of non-native types are
/// cast to VARCHAR and travel as strings.
fn query_relation(conn: &Connection, relation: &str) -> duckdb::Result<RowSet> {
    let columns = describe_relation(conn, relation)?;
    if columns.is_empty() {
        return Ok(RowSet::empty(columns));
    }

    let select_list: Vec<String> = columns
        .iter()
        .map(|c| {
            let ident = quote_ident(&c.name);
            if is_native(&c.data_type) {
                ident
            } else {
                format!("CAST({} AS VARCHAR) AS {}", ident, ident)
            }
        })
        .collect();
    let sql = format!("SELECT {} FROM {}", select_list.join(", "), relation);
    tracing::debug!("Executing SQL: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let mut result_rows = stmt.query([])?;

    let mut rows = Vec::new();
    while let Some(row) = result_rows.next()? {
        let mut map = serde_json::Map::new();
        for (i, column) in columns.iter().enumerate() {
            let value = match row.get_ref(i) {
                Ok(value_ref) => value_ref_to_json(value_ref),
                Err(_) => Value::Null,
            };
            map.insert(column.name.clone(), value);
        }
        rows.push(Value::Object(map));
    }

    Ok(RowSet::new(columns, rows))
}

fn is_native(data_type: &str) -> bool {
    NATIVE_TYPES.contains(&data_type.to_ascii_uppercase().as_str())
}

/// Convert a DuckDB ValueRef to a JSON value
fn value_ref_to_json(value: ValueRef) -> Row {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Number(i.into()),
        ValueRef::SmallInt(i) => Value::Number(i.into()),
        ValueRef::Int(i) => Value::Number(i.into()),
        ValueRef::BigInt(i) => Value::Number(i.into()),
        ValueRef::UTinyInt(i) => Value::Number(i.into()),
        ValueRef::USmallInt(i) => Value::Number(i.into()),
        ValueRef::UInt(i) => Value::Number(i.into()),
        ValueRef::UBigInt(i) => Value::Number(i.into()),
        ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
        // Non-native columns are cast to VARCHAR before they get here
        other => Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_items_csv(dir: &Path) -> PathBuf {
        let file = dir.join("items.csv");
        std::fs::write(
            &file,
            "id;name;partition_date\n1;Widget;2025-02-01\n2;Gadget;2025-02-01\n",
        )
        .unwrap();
        file
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("items"), "\"items\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(escape_literal("it's"), "it''s");
    }

    #[test]
    fn test_replace_and_read_table() {
        let dir = TempDir::new().unwrap();
        let file = write_items_csv(dir.path());
        let warehouse = DuckDbWarehouse::new(dir.path().join("warehouse.db"));

        let rows = warehouse
            .replace_from_delimited("bronze_items_source", &file, ';')
            .unwrap();
        assert_eq!(rows, 2);

        let table = warehouse.read_table("bronze_items_source").unwrap();
        assert_eq!(table.column_names(), vec!["id", "name", "partition_date"]);
        assert_eq!(table.rows[0]["id"], json!(1));
        assert_eq!(table.rows[1]["name"], json!("Gadget"));
        assert_eq!(table.rows[0]["partition_date"], json!("2025-02-01"));
    }

    #[test]
    fn test_replace_missing_file() {
        let dir = TempDir::new().unwrap();
        let warehouse = DuckDbWarehouse::new(dir.path().join("warehouse.db"));

        let result = warehouse.replace_from_delimited("t", &dir.path().join("nope.csv"), ';');
        assert!(matches!(result, Err(WarehouseError::InvalidInput(_))));
    }

    #[test]
    fn test_export_delimited() {
        let dir = TempDir::new().unwrap();
        let warehouse = DuckDbWarehouse::new(dir.path().join("warehouse.db"));
        warehouse
            .execute_batch(
                "CREATE TABLE silver_items AS SELECT * FROM (VALUES (1, 'a'), (2, 'b')) t(id, name)",
            )
            .unwrap();

        let out = dir.path().join("silver").join("2025-02-01").join("items.csv");
        assert_eq!(warehouse.export_delimited("silver_items", &out, ',').unwrap(), 2);

        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.starts_with("id,name"));
        assert!(content.contains("2,b"));
    }

    #[test]
    fn test_read_missing_table() {
        let dir = TempDir::new().unwrap();
        let warehouse = DuckDbWarehouse::new(dir.path().join("warehouse.db"));
        assert!(matches!(
            warehouse.read_table("gold_items"),
            Err(WarehouseError::QueryFailed(_))
        ));
    }
}
