//! In-memory test double of the warehouse

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};

use super::{Warehouse, WarehouseError, WarehouseResult, ensure_parent};
use crate::rowset::{ColumnInfo, RowSet, render_value};

/// Warehouse keeping tables in memory
///
/// Delimited files are parsed naively: one record per line, no quoting, every
/// column typed `VARCHAR`.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: RefCell<HashMap<String, RowSet>>,
}

impl MemoryWarehouse {
    /// Create an empty warehouse
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a table with the given rows
    pub fn put_table(&self, table: &str, rows: RowSet) {
        self.tables.borrow_mut().insert(table.to_string(), rows);
    }

    /// Current contents of a table, if any
    pub fn table(&self, table: &str) -> Option<RowSet> {
        self.tables.borrow().get(table).cloned()
    }

    /// Names of all tables, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Warehouse for MemoryWarehouse {
    fn replace_from_delimited(
        &self,
        table: &str,
        file: &Path,
        delimiter: char,
    ) -> WarehouseResult<usize> {
        let content = std::fs::read_to_string(file)
            .map_err(|e| WarehouseError::Io(format!("Failed to read {}: {}", file.display(), e)))?;

        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or_else(|| {
            WarehouseError::InvalidInput(format!("{} has no header row", file.display()))
        })?;
        let columns: Vec<ColumnInfo> = header
            .split(delimiter)
            .map(|name| ColumnInfo::new(name.trim(), "VARCHAR"))
            .collect();

        let mut rows = Vec::new();
        for (n, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(delimiter).collect();
            if fields.len() != columns.len() {
                return Err(WarehouseError::QueryFailed(format!(
                    "{}: line {} has {} fields, expected {}",
                    file.display(),
                    n + 2,
                    fields.len(),
                    columns.len()
                )));
            }
            let row: Map<String, Value> = columns
                .iter()
                .zip(fields)
                .map(|(c, f)| (c.name.clone(), Value::String(f.to_string())))
                .collect();
            rows.push(Value::Object(row));
        }

        let count = rows.len();
        self.put_table(table, RowSet::new(columns, rows));
        Ok(count)
    }

    fn read_table(&self, table: &str) -> WarehouseResult<RowSet> {
        self.table(table)
            .ok_or_else(|| WarehouseError::QueryFailed(format!("Table {} does not exist", table)))
    }

    fn export_delimited(
        &self,
        table: &str,
        file: &Path,
        delimiter: char,
    ) -> WarehouseResult<usize> {
        let rows = self.read_table(table)?;
        ensure_parent(file)?;

        let sep = delimiter.to_string();
        let mut out = rows.column_names().join(&sep);
        out.push('\n');
        for row in &rows.rows {
            let fields: Vec<String> = rows
                .columns
                .iter()
                .map(|c| match row.get(&c.name) {
                    None | Some(Value::Null) => String::new(),
                    Some(value) => render_value(value),
                })
                .collect();
            out.push_str(&fields.join(&sep));
            out.push('\n');
        }

        std::fs::write(file, out)
            .map_err(|e| WarehouseError::Io(format!("Failed to write {}: {}", file.display(), e)))?;
        Ok(rows.row_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_and_export() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("attributes.csv");
        std::fs::write(&src, "id;name\n1;color\n2;size\n").unwrap();

        let warehouse = MemoryWarehouse::new();
        assert_eq!(warehouse.replace_from_delimited("t", &src, ';').unwrap(), 2);
        assert_eq!(warehouse.read_table("t").unwrap().rows[1], json!({"id": "2", "name": "size"}));

        let out = dir.path().join("out").join("t.csv");
        warehouse.export_delimited("t", &out, ',').unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "id,name\n1,color\n2,size\n");
    }

    #[test]
    fn test_ragged_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bad.csv");
        std::fs::write(&src, "id;name\n1\n").unwrap();

        let warehouse = MemoryWarehouse::new();
        assert!(warehouse.replace_from_delimited("t", &src, ';').is_err());
        assert!(warehouse.table("t").is_none());
    }
}
