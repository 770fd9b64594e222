//! Partition keys and the project's bronze/silver/gold filesystem layout

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Date format used by partition keys
pub const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Column carrying the logical partition in silver/gold tables
pub const PARTITION_COLUMN: &str = "partition_date";

/// Errors raised when a partition key has to be interpreted as a date
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Invalid partition date format: {0}")]
    InvalidDate(String),

    #[error("Partition range is empty: {from} is after {to}")]
    EmptyRange { from: String, to: String },
}

/// Logical partition key for one pipeline run
///
/// Keys are calendar dates by convention. Construction never validates the
/// format; only [`PartitionKey::parse_date`] does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Wrap a raw key without validation
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strictly parse a `YYYY-MM-DD` date
    pub fn parse_date(value: &str) -> Result<NaiveDate, PartitionError> {
        NaiveDate::parse_from_str(value, PARTITION_DATE_FORMAT)
            .map_err(|_| PartitionError::InvalidDate(value.to_string()))
    }

    /// Every daily key from `from` to `to` inclusive, ascending
    pub fn daily_range(from: &str, to: &str) -> Result<Vec<PartitionKey>, PartitionError> {
        let start = Self::parse_date(from)?;
        let end = Self::parse_date(to)?;
        if start > end {
            return Err(PartitionError::EmptyRange {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        Ok(start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| PartitionKey(day.format(PARTITION_DATE_FORMAT).to_string()))
            .collect())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Resolved filesystem locations of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
    data_dir: PathBuf,
    warehouse: PathBuf,
}

impl ProjectLayout {
    /// Layout with the default `data/` directory and `data/warehouse.db`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let data_dir = root.join("data");
        let warehouse = data_dir.join("warehouse.db");
        Self {
            root,
            data_dir,
            warehouse,
        }
    }

    /// Layout with explicit data directory and warehouse paths
    ///
    /// Relative paths are resolved against `root`.
    pub fn with_paths(root: impl Into<PathBuf>, data_dir: &Path, warehouse: &Path) -> Self {
        let root = root.into();
        let data_dir = resolve(&root, data_dir);
        let warehouse = resolve(&root, warehouse);
        Self {
            root,
            data_dir,
            warehouse,
        }
    }

    /// Project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding the canonical bronze source files
    pub fn bronze_source_dir(&self) -> PathBuf {
        self.data_dir.join("bronze")
    }

    /// Canonical source file for a named source
    pub fn bronze_source_file(&self, source: &str) -> PathBuf {
        self.bronze_source_dir().join(format!("{}.csv", source))
    }

    /// Bronze staging directory for a partition
    pub fn bronze_partition_dir(&self, key: &PartitionKey) -> PathBuf {
        self.bronze_source_dir().join(key.as_str())
    }

    /// Silver staging directory for a partition
    pub fn silver_partition_dir(&self, key: &PartitionKey) -> PathBuf {
        self.data_dir.join("silver").join(key.as_str())
    }

    /// Root of the versioned gold tables (partition independent)
    pub fn gold_root(&self) -> PathBuf {
        self.data_dir.join("gold")
    }

    /// Storage path of one gold table
    pub fn gold_table_path(&self, entity: &str) -> PathBuf {
        self.gold_root().join(entity)
    }

    /// Warehouse database file
    pub fn warehouse_path(&self) -> &Path {
        &self.warehouse
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
