//! Read path over the versioned gold tables
//!
//! [`GoldQuery`] answers the questions the gold CLI asks: which tables exist,
//! what the latest snapshot holds, which version carries a partition, what a
//! table's history looks like and what the newest commit changed. It never
//! writes anything, and it does not format output.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::PARTITION_COLUMN;
use crate::rowset::{ColumnInfo, RowSet};
use crate::table::{ChangeType, TableError, VersionRecord, VersionedTableStore};

/// Table whose changes `diff` reports by default
pub const DIFF_TABLE: &str = "values";

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Table '{table}' not found")]
    UnknownTable {
        table: String,
        available: Vec<String>,
    },

    #[error("No gold tables found in {0}")]
    NoTables(PathBuf),

    #[error("No versions found for table '{0}'")]
    NoHistory(String),

    #[error("Table '{table}' has {versions} version(s); at least 2 are needed to diff")]
    InsufficientHistory { table: String, versions: usize },

    #[error("CDF not available: {0}")]
    ChangeFeedUnavailable(String),

    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Order in which history is scanned for a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOrder {
    /// Latest version first
    #[default]
    NewestFirst,
    /// Version 0 first
    OldestFirst,
}

/// Result of a time-travel lookup
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionLookup {
    /// First version (in scan order) containing the partition, rows filtered to it
    Found { version: u64, rows: RowSet },
    /// No version contains the partition; dates of the latest version when readable
    NotFound {
        available_dates: Option<Vec<String>>,
    },
    /// The table has no history
    NoVersions,
}

/// Overview of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub table: String,
    pub row_count: usize,
    pub version_count: usize,
    /// Distinct partition dates of the latest snapshot, sorted
    pub partition_dates: Vec<String>,
    pub schema: Vec<ColumnInfo>,
}

/// Version range of a diff; the changes committed after `from` up to `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBounds {
    pub from: u64,
    pub to: u64,
}

/// Tally of the changes between two versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub table: String,
    pub bounds: VersionBounds,
    pub total_changes: usize,
    /// Count per change type, in first-seen order
    pub breakdown: Vec<(ChangeType, usize)>,
}

/// Queries over the gold tables below one root directory
pub struct GoldQuery<'a, S: VersionedTableStore> {
    store: &'a S,
    root: PathBuf,
}

impl<'a, S: VersionedTableStore> GoldQuery<'a, S> {
    pub fn new(store: &'a S, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Table names, sorted; hidden (`_`-prefixed) directories are skipped
    pub fn list_tables(&self) -> QueryResult<Vec<String>> {
        Ok(self.store.list_tables(&self.root)?)
    }

    /// Storage path of a known table
    pub fn resolve_table(&self, table: &str) -> QueryResult<PathBuf> {
        let available = self.list_tables()?;
        if available.is_empty() {
            return Err(QueryError::NoTables(self.root.clone()));
        }
        if !available.iter().any(|t| t == table) {
            return Err(QueryError::UnknownTable {
                table: table.to_string(),
                available,
            });
        }
        Ok(self.root.join(table))
    }

    /// Latest snapshot of a table
    pub fn latest(&self, table: &str) -> QueryResult<RowSet> {
        let path = self.resolve_table(table)?;
        Ok(self.store.read_latest(&path)?)
    }

    /// Find the version holding `date` in its `partition_date` column
    ///
    /// Scans history in `order` and stops at the first match. Every candidate
    /// version is read in full, so the cost grows with versions times rows.
    pub fn find_partition(
        &self,
        table: &str,
        date: &str,
        order: ScanOrder,
    ) -> QueryResult<PartitionLookup> {
        let path = self.resolve_table(table)?;
        let mut history = self.store.history(&path)?;
        if history.is_empty() {
            return Ok(PartitionLookup::NoVersions);
        }
        if order == ScanOrder::OldestFirst {
            history.reverse();
        }

        for record in &history {
            let rows = match self.store.read_version(&path, record.version) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!("Skipping version {} of {}: {}", record.version, table, e);
                    continue;
                }
            };
            if rows.column_contains(PARTITION_COLUMN, date) {
                tracing::debug!(
                    "Partition {} found in version {} of {}",
                    date,
                    record.version,
                    table
                );
                return Ok(PartitionLookup::Found {
                    version: record.version,
                    rows: rows.filter_eq(PARTITION_COLUMN, date),
                });
            }
        }

        let available_dates = match self.store.read_latest(&path) {
            Ok(latest) => Some(latest.distinct_values(PARTITION_COLUMN)),
            Err(e) => {
                tracing::warn!("Unable to read latest version of {}: {}", table, e);
                None
            }
        };
        Ok(PartitionLookup::NotFound { available_dates })
    }

    /// Row count, version count, partition dates and schema of a table
    pub fn info(&self, table: &str) -> QueryResult<TableSummary> {
        let path = self.resolve_table(table)?;
        let history = self.store.history(&path)?;
        if history.is_empty() {
            return Err(QueryError::NoHistory(table.to_string()));
        }
        let latest = self.store.read_latest(&path)?;

        Ok(TableSummary {
            table: table.to_string(),
            row_count: latest.row_count(),
            version_count: history.len(),
            partition_dates: latest.distinct_values(PARTITION_COLUMN),
            schema: latest.columns.clone(),
        })
    }

    /// History as the store returns it, newest first
    pub fn versions(&self, table: &str) -> QueryResult<Vec<VersionRecord>> {
        let path = self.resolve_table(table)?;
        let history = self.store.history(&path)?;
        if history.is_empty() {
            return Err(QueryError::NoHistory(table.to_string()));
        }
        Ok(history)
    }

    /// Tally the changes between two versions
    ///
    /// Without explicit bounds the two newest history entries are used; a
    /// table with fewer than two versions is rejected before the change feed
    /// is read.
    pub fn diff(&self, table: &str, bounds: Option<VersionBounds>) -> QueryResult<DiffSummary> {
        let path = self.resolve_table(table)?;
        let bounds = match bounds {
            Some(bounds) => bounds,
            None => {
                let history = self.store.history(&path)?;
                if history.len() < 2 {
                    return Err(QueryError::InsufficientHistory {
                        table: table.to_string(),
                        versions: history.len(),
                    });
                }
                VersionBounds {
                    from: history[1].version,
                    to: history[0].version,
                }
            }
        };

        let batches = self
            .store
            .change_feed(&path, bounds.from, bounds.to)
            .map_err(|e| match e {
                TableError::ChangeFeedUnavailable(reason) => {
                    QueryError::ChangeFeedUnavailable(reason)
                }
                other => QueryError::Table(other),
            })?;

        let mut breakdown: Vec<(ChangeType, usize)> = Vec::new();
        let mut total_changes = 0;
        for record in batches.iter().flat_map(|b| &b.records) {
            total_changes += 1;
            match breakdown.iter_mut().find(|(t, _)| *t == record.change_type) {
                Some((_, count)) => *count += 1,
                None => breakdown.push((record.change_type, 1)),
            }
        }

        Ok(DiffSummary {
            table: table.to_string(),
            bounds,
            total_changes,
            breakdown,
        })
    }
}
