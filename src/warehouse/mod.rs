//! Relational warehouse abstraction
//!
//! The pipeline only needs three things from the warehouse: replace a table
//! from a delimited file, read a whole table, and export a table to a
//! delimited file. [`Warehouse`] captures exactly that.
//!
//! # Supported Backends
//!
//! - **DuckDB**: embedded file database (`duckdb-backend` feature)
//!
//! An in-memory double lives in [`fake`] for tests (`test-utils` feature).

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

use std::path::Path;

use thiserror::Error;

use crate::rowset::RowSet;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbWarehouse;
#[cfg(any(test, feature = "test-utils"))]
pub use fake::MemoryWarehouse;

/// Errors that can occur during warehouse operations
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Failed to open the warehouse
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Statement execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Input rejected before reaching the engine
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),
}

/// Result type for warehouse operations
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Capability interface of the relational warehouse
pub trait Warehouse {
    /// Replace `table` with the contents of a delimited file with a header row
    ///
    /// Returns the row count of the new table.
    fn replace_from_delimited(
        &self,
        table: &str,
        file: &Path,
        delimiter: char,
    ) -> WarehouseResult<usize>;

    /// Read every row of `table`
    fn read_table(&self, table: &str) -> WarehouseResult<RowSet>;

    /// Write `table` to a delimited file with a header row, overwriting it
    ///
    /// Returns the number of rows written.
    fn export_delimited(&self, table: &str, file: &Path, delimiter: char)
    -> WarehouseResult<usize>;
}

/// Create the parent directory of `file` if needed
pub(crate) fn ensure_parent(file: &Path) -> WarehouseResult<()> {
    if let Some(parent) = file.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            WarehouseError::Io(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}
