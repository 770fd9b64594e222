//! Versioned gold tables
//!
//! The gold layer keeps one Delta table per entity. Every write appends an
//! immutable version; history is append-only and listed newest first. Tables
//! are written with the change data feed enabled, so the row changes of a
//! commit can be read between two versions.
//!
//! The contract is the [`VersionedTableStore`] trait, implemented by
//! [`DeltaTableStore`] over `deltalake` (`delta-backend` feature). An in-memory
//! double lives in [`fake`] for tests (`test-utils` feature).
//!
//! # Example
//!
//! ```ignore
//! use medallion_lake::table::{DeltaTableStore, MergeKey, TableState, VersionedTableStore};
//!
//! let store = DeltaTableStore::new()?;
//! let path = std::path::Path::new("data/gold/items");
//! let commit = match store.probe(path)? {
//!     TableState::Present { .. } => store.merge(path, &snapshot, &MergeKey::new(["id"]))?,
//!     _ => store.create(path, &snapshot)?,
//! };
//! println!("wrote version {}", commit.version);
//! ```

#[cfg(feature = "delta-backend")]
pub mod delta;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::rowset::{Row, RowSet};

#[cfg(feature = "delta-backend")]
pub use delta::DeltaTableStore;
#[cfg(any(test, feature = "test-utils"))]
pub use fake::MemoryTableStore;

/// Errors that can occur during table operations
#[derive(Error, Debug)]
pub enum TableError {
    /// No table at the path
    #[error("Table not found: {0}")]
    NotFound(PathBuf),

    /// Requested version is not in the history
    #[error("Version {version} not found for table {path}")]
    VersionNotFound { path: PathBuf, version: u64 },

    /// Table exists but its state cannot be read
    #[error("Table at {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Source snapshot does not fit the table schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Merge key column missing from a snapshot
    #[error("Merge key column '{0}' is missing")]
    MissingMergeKey(String),

    /// Several source rows match the same target row
    #[error("Multiple source rows match the target row with key {0}")]
    AmbiguousMerge(String),

    /// Change feed cannot be produced for the requested range
    #[error("Change data feed unavailable: {0}")]
    ChangeFeedUnavailable(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),

    /// Error raised by the table format engine
    #[error("Engine error: {0}")]
    Engine(String),

    /// Value conversion error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for table operations
pub type TableResult<T> = Result<T, TableError>;

/// Outcome of probing a table path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    /// Nothing stored at the path
    Absent,
    /// A readable table with at least one version
    Present { latest_version: u64 },
    /// Something exists at the path but cannot be opened as a table
    Unreadable { reason: String },
}

/// Match-key columns used by merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeKey(Vec<String>);

impl MergeKey {
    /// Create a merge key from column names
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(columns.into_iter().map(Into::into).collect())
    }

    /// Key columns
    pub fn columns(&self) -> &[String] {
        &self.0
    }

    /// Predicate in `target.col = source.col AND ...` form, for logs
    pub fn predicate(&self) -> String {
        self.0
            .iter()
            .map(|c| format!("target.{} = source.{}", c, c))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// One entry of a table's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Version number (0 for the first write)
    pub version: u64,
    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
    /// Operation that produced the version
    pub operation: String,
    /// Operation metrics (row counts)
    #[serde(default)]
    pub metrics: BTreeMap<String, u64>,
}

/// Row-level change classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    /// Label used in the change feed
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "insert",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(ChangeType::Insert),
            "update" => Ok(ChangeType::Update),
            "delete" => Ok(ChangeType::Delete),
            other => Err(TableError::Serialization(format!(
                "Unknown change type: {}",
                other
            ))),
        }
    }
}

/// One changed row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Change classification
    pub change_type: ChangeType,
    /// Version whose commit produced the change
    pub commit_version: u64,
    /// Row image after the change
    pub row: Row,
}

/// Changes written by a single commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Commit version
    pub version: u64,
    /// Changed rows in write order
    pub records: Vec<ChangeRecord>,
}

/// Capability interface of the versioned table format
///
/// Paths identify tables. History is returned newest first, and the
/// query layer relies on that order without re-sorting.
pub trait VersionedTableStore {
    /// Check whether a table exists and can be opened
    fn probe(&self, path: &Path) -> TableResult<TableState>;

    /// Create a table from a snapshot, discarding anything at the path
    fn create(&self, path: &Path, snapshot: &RowSet) -> TableResult<VersionRecord>;

    /// Upsert a snapshot: matched rows are updated, unmatched rows inserted
    fn merge(&self, path: &Path, snapshot: &RowSet, key: &MergeKey)
    -> TableResult<VersionRecord>;

    /// Read the latest version
    fn read_latest(&self, path: &Path) -> TableResult<RowSet>;

    /// Read a specific version
    fn read_version(&self, path: &Path, version: u64) -> TableResult<RowSet>;

    /// Every version, newest first
    fn history(&self, path: &Path) -> TableResult<Vec<VersionRecord>>;

    /// Changes committed after `from_version` up to and including `to_version`
    fn change_feed(
        &self,
        path: &Path,
        from_version: u64,
        to_version: u64,
    ) -> TableResult<Vec<ChangeBatch>>;

    /// Names of the non-hidden tables below a root
    fn list_tables(&self, root: &Path) -> TableResult<Vec<String>>;
}

/// Non-hidden subdirectories of `root`, sorted
///
/// Names starting with `_` are hidden. A missing root has no tables.
pub fn list_table_dirs(root: &Path) -> TableResult<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(root)
        .map_err(|e| TableError::Io(format!("Failed to read {}: {}", root.display(), e)))?;

    let mut tables = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TableError::Io(e.to_string()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() && !name.starts_with('_') {
            tables.push(name);
        }
    }
    tables.sort();

    Ok(tables)
}

/// Canonical key string of a row, or None when any key column is null
pub(crate) fn key_of(row: &Row, key: &MergeKey) -> Option<String> {
    let mut parts = Vec::with_capacity(key.columns().len());
    for column in key.columns() {
        match row.get(column) {
            None | Some(Value::Null) => return None,
            Some(value) => parts.push(value.clone()),
        }
    }
    Some(Value::Array(parts).to_string())
}

/// Check a merge source against the target columns
///
/// Every key column must exist on both sides. Returns the keys occurring more
/// than once in the source; they are ambiguous only if the target holds them.
pub(crate) fn check_merge_source(
    target_columns: &[&str],
    source: &RowSet,
    key: &MergeKey,
) -> TableResult<BTreeSet<String>> {
    for column in key.columns() {
        if !target_columns.contains(&column.as_str()) || !source.has_column(column) {
            return Err(TableError::MissingMergeKey(column.clone()));
        }
    }

    let extra: Vec<&str> = source
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| !target_columns.contains(name))
        .collect();
    if !extra.is_empty() {
        tracing::warn!(
            "Ignoring source columns not present in target schema: {}",
            extra.join(", ")
        );
    }

    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for row in &source.rows {
        if let Some(k) = key_of(row, key)
            && !seen.insert(k.clone())
        {
            duplicates.insert(k);
        }
    }

    Ok(duplicates)
}
