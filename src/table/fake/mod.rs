//! In-memory test double of the versioned table store
//!
//! Keeps every version in memory and counts reads, so tests can assert which
//! collaborator calls a code path makes. Merges are emulated by
//! [`merge::merge_rows`].

pub mod merge;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;

use self::merge::{creation_changes, merge_rows};
use crate::rowset::{Row, RowSet};
use crate::table::{
    ChangeBatch, ChangeRecord, ChangeType, MergeKey, TableError, TableResult, TableState,
    VersionRecord, VersionedTableStore, list_table_dirs,
};

/// Operation name recorded for full (re)creation
pub const OPERATION_CREATE: &str = "CREATE OR REPLACE";

/// Operation name recorded for merges
pub const OPERATION_MERGE: &str = "MERGE";

#[derive(Debug, Clone)]
struct StoredVersion {
    record: VersionRecord,
    rows: RowSet,
    changes: Vec<ChangeRecord>,
}

#[derive(Debug, Clone)]
enum Entry {
    Table(Vec<StoredVersion>),
    Unreadable(String),
}

/// Versioned table store held in memory
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RefCell<BTreeMap<PathBuf, Entry>>,
    unreadable_versions: RefCell<BTreeSet<(PathBuf, u64)>>,
    no_change_feed: RefCell<BTreeSet<PathBuf>>,
    change_feed_calls: Cell<usize>,
    version_reads: Cell<usize>,
}

impl MemoryTableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Put something unreadable at `path`
    pub fn mark_unreadable(&self, path: &Path, reason: &str) {
        self.tables
            .borrow_mut()
            .insert(path.to_path_buf(), Entry::Unreadable(reason.to_string()));
    }

    /// Make one version fail to read, including as the latest version
    pub fn mark_version_unreadable(&self, path: &Path, version: u64) {
        self.unreadable_versions
            .borrow_mut()
            .insert((path.to_path_buf(), version));
    }

    /// Make the change feed of a table unavailable
    pub fn disable_change_feed(&self, path: &Path) {
        self.no_change_feed.borrow_mut().insert(path.to_path_buf());
    }

    /// Number of `change_feed` calls so far
    pub fn change_feed_calls(&self) -> usize {
        self.change_feed_calls.get()
    }

    /// Number of `read_version` calls so far
    pub fn version_reads(&self) -> usize {
        self.version_reads.get()
    }

    fn versions(&self, path: &Path) -> TableResult<Vec<StoredVersion>> {
        match self.tables.borrow().get(path) {
            None => Err(TableError::NotFound(path.to_path_buf())),
            Some(Entry::Unreadable(reason)) => Err(TableError::Corrupt {
                path: path.to_path_buf(),
                reason: reason.clone(),
            }),
            Some(Entry::Table(versions)) => Ok(versions.clone()),
        }
    }

    fn check_readable(&self, path: &Path, version: u64) -> TableResult<()> {
        if self
            .unreadable_versions
            .borrow()
            .contains(&(path.to_path_buf(), version))
        {
            return Err(TableError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("data for version {} is unreadable", version),
            });
        }
        Ok(())
    }

    fn commit(
        &self,
        path: &Path,
        mut versions: Vec<StoredVersion>,
        operation: &str,
        rows: RowSet,
        changes: Vec<(ChangeType, Row)>,
        metrics: BTreeMap<String, u64>,
    ) -> VersionRecord {
        let version = versions.last().map(|v| v.record.version + 1).unwrap_or(0);
        let record = VersionRecord {
            version,
            timestamp: Utc::now(),
            operation: operation.to_string(),
            metrics,
        };
        let changes = changes
            .into_iter()
            .map(|(change_type, row)| ChangeRecord {
                change_type,
                commit_version: version,
                row,
            })
            .collect();

        versions.push(StoredVersion {
            record: record.clone(),
            rows,
            changes,
        });
        self.tables
            .borrow_mut()
            .insert(path.to_path_buf(), Entry::Table(versions));

        record
    }
}

impl VersionedTableStore for MemoryTableStore {
    fn probe(&self, path: &Path) -> TableResult<TableState> {
        Ok(match self.tables.borrow().get(path) {
            None => TableState::Absent,
            Some(Entry::Unreadable(reason)) => TableState::Unreadable {
                reason: reason.clone(),
            },
            Some(Entry::Table(versions)) => match versions.last() {
                Some(latest) => TableState::Present {
                    latest_version: latest.record.version,
                },
                None => TableState::Absent,
            },
        })
    }

    fn create(&self, path: &Path, snapshot: &RowSet) -> TableResult<VersionRecord> {
        let (changes, metrics) = creation_changes(snapshot);
        Ok(self.commit(
            path,
            Vec::new(),
            OPERATION_CREATE,
            snapshot.clone(),
            changes,
            metrics,
        ))
    }

    fn merge(
        &self,
        path: &Path,
        snapshot: &RowSet,
        key: &MergeKey,
    ) -> TableResult<VersionRecord> {
        let versions = self.versions(path)?;
        let target = versions
            .last()
            .map(|v| v.rows.clone())
            .ok_or_else(|| TableError::NotFound(path.to_path_buf()))?;

        let out = merge_rows(&target, snapshot, key)?;
        Ok(self.commit(
            path,
            versions,
            OPERATION_MERGE,
            out.rows,
            out.changes,
            out.metrics,
        ))
    }

    fn read_latest(&self, path: &Path) -> TableResult<RowSet> {
        let latest = self
            .versions(path)?
            .pop()
            .ok_or_else(|| TableError::NotFound(path.to_path_buf()))?;
        self.check_readable(path, latest.record.version)?;
        Ok(latest.rows)
    }

    fn read_version(&self, path: &Path, version: u64) -> TableResult<RowSet> {
        self.version_reads.set(self.version_reads.get() + 1);
        self.check_readable(path, version)?;

        self.versions(path)?
            .into_iter()
            .find(|v| v.record.version == version)
            .map(|v| v.rows)
            .ok_or_else(|| TableError::VersionNotFound {
                path: path.to_path_buf(),
                version,
            })
    }

    fn history(&self, path: &Path) -> TableResult<Vec<VersionRecord>> {
        Ok(self
            .versions(path)?
            .into_iter()
            .rev()
            .map(|v| v.record)
            .collect())
    }

    fn change_feed(
        &self,
        path: &Path,
        from_version: u64,
        to_version: u64,
    ) -> TableResult<Vec<ChangeBatch>> {
        self.change_feed_calls.set(self.change_feed_calls.get() + 1);

        if self.no_change_feed.borrow().contains(path) {
            return Err(TableError::ChangeFeedUnavailable(format!(
                "change data feed is not enabled for {}",
                path.display()
            )));
        }
        if from_version > to_version {
            return Err(TableError::ChangeFeedUnavailable(format!(
                "start version {} is after end version {}",
                from_version, to_version
            )));
        }

        let versions = self.versions(path)?;
        let latest = versions.last().map(|v| v.record.version).unwrap_or(0);
        if to_version > latest {
            return Err(TableError::VersionNotFound {
                path: path.to_path_buf(),
                version: to_version,
            });
        }

        Ok(versions
            .into_iter()
            .filter(|v| v.record.version > from_version && v.record.version <= to_version)
            .map(|v| ChangeBatch {
                version: v.record.version,
                records: v.changes,
            })
            .collect())
    }

    fn list_tables(&self, root: &Path) -> TableResult<Vec<String>> {
        let mut names: Vec<String> = self
            .tables
            .borrow()
            .keys()
            .filter(|path| path.parent() == Some(root))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('_'))
            .collect();

        // Directories created outside the store are tables too
        for name in list_table_dirs(root)? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();

        Ok(names)
    }
}
