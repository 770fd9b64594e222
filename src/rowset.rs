//! Tabular row sets exchanged between the warehouse, the table store and the CLI
//!
//! Rows are JSON objects keyed by column name. Values of SQL types that are not
//! numeric or boolean (dates, timestamps, decimals, ...) travel as strings.

use serde::{Deserialize, Serialize};

/// Query result row as a JSON object
pub type Row = serde_json::Value;

/// Column name and SQL type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// SQL type name as reported by the engine (e.g. `BIGINT`, `VARCHAR`)
    pub data_type: String,
}

impl ColumnInfo {
    /// Create a new column description
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Ordered set of rows with their schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Columns in table order
    pub columns: Vec<ColumnInfo>,
    /// Rows of data
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Create a new row set
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Create an empty row set with the given schema
    pub fn empty(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the row set has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Check whether a column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// True if any row's `column` renders equal to `value`
    pub fn column_contains(&self, column: &str, value: &str) -> bool {
        self.has_column(column)
            && self
                .rows
                .iter()
                .any(|row| row.get(column).map(render_value).as_deref() == Some(value))
    }

    /// Distinct non-null values of a column, rendered and sorted
    pub fn distinct_values(&self, column: &str) -> Vec<String> {
        if !self.has_column(column) {
            return Vec::new();
        }
        let mut values: Vec<String> = self
            .rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_null())
            .map(render_value)
            .collect();
        values.sort();
        values.dedup();
        values
    }

    /// Keep only rows whose `column` renders equal to `value`
    pub fn filter_eq(&self, column: &str, value: &str) -> RowSet {
        let rows = self
            .rows
            .iter()
            .filter(|row| row.get(column).map(render_value).as_deref() == Some(value))
            .cloned()
            .collect();
        RowSet::new(self.columns.clone(), rows)
    }

    /// First `limit` rows
    pub fn head(&self, limit: usize) -> RowSet {
        RowSet::new(
            self.columns.clone(),
            self.rows.iter().take(limit).cloned().collect(),
        )
    }
}

/// Render a JSON value the way it is shown to users
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Format a row set as an aligned text table
pub fn format_as_table(result: &RowSet) -> String {
    if result.columns.is_empty() {
        return "(0 rows)".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.name.len()).collect();

    for row in &result.rows {
        for (i, col) in result.columns.iter().enumerate() {
            let value = row.get(&col.name).unwrap_or(&serde_json::Value::Null);
            widths[i] = widths[i].max(render_value(value).len());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c.name, width = widths[i]))
        .collect();
    output.push_str(header.join(" | ").trim_end());
    output.push('\n');

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&separator.join("-+-"));
    output.push('\n');

    for row in &result.rows {
        let values: Vec<String> = result
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let value = row.get(&col.name).unwrap_or(&serde_json::Value::Null);
                format!("{:width$}", render_value(value), width = widths[i])
            })
            .collect();
        output.push_str(values.join(" | ").trim_end());
        output.push('\n');
    }

    output.push_str(&format!("({} rows)", result.row_count()));

    output
}
