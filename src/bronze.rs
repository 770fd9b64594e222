//! Bronze layer: stage raw source files per partition and load them into the warehouse

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::partition::{PartitionKey, ProjectLayout};
use crate::warehouse::{Warehouse, WarehouseError};

/// Errors raised by the bronze stage
#[derive(Error, Debug)]
pub enum BronzeError {
    /// Canonical source file does not exist
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    /// Partition directory holds no staged files
    #[error("No staged files in {0}")]
    NothingStaged(PathBuf),

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),
}

/// Result type for bronze operations
pub type BronzeResult<T> = Result<T, BronzeError>;

/// A source file copied into a partition directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    /// Source name
    pub source: String,
    /// Path of the staged copy
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 of the staged content (hex)
    pub content_hash: String,
    /// False when the copy it replaced had the same content
    pub changed: bool,
}

/// One warehouse table replaced by a load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedTable {
    /// Warehouse table name
    pub table: String,
    /// Staged file it was loaded from
    pub source_file: PathBuf,
    /// Row count of the new table
    pub rows: usize,
}

/// Result of loading a partition's staged files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Partition that was loaded
    pub partition: PartitionKey,
    /// Tables in load order
    pub tables: Vec<LoadedTable>,
}

impl LoadReport {
    /// Total rows across all loaded tables
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Warehouse table name for a bronze source
pub fn bronze_table_name(source: &str) -> String {
    format!("bronze_{}_source", source)
}

/// Stages and loads bronze source files
pub struct BronzeIngestor<'a, W: Warehouse> {
    layout: &'a ProjectLayout,
    warehouse: &'a W,
    delimiter: char,
}

impl<'a, W: Warehouse> BronzeIngestor<'a, W> {
    /// Create an ingestor reading `delimiter`-separated sources
    pub fn new(layout: &'a ProjectLayout, warehouse: &'a W, delimiter: char) -> Self {
        Self {
            layout,
            warehouse,
            delimiter,
        }
    }

    /// Copy `data/bronze/<source>.csv` into the partition directory
    ///
    /// An existing staged copy is overwritten.
    pub fn ingest(&self, source: &str, key: &PartitionKey) -> BronzeResult<StagedFile> {
        let source_file = self.layout.bronze_source_file(source);
        if !source_file.is_file() {
            return Err(BronzeError::SourceMissing(source_file));
        }

        let dir = self.layout.bronze_partition_dir(key);
        fs::create_dir_all(&dir)
            .map_err(|e| BronzeError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;

        let dest = dir.join(format!("{}.csv", source));
        let previous = if dest.is_file() {
            Some(content_hash(&dest)?)
        } else {
            None
        };

        let size = fs::copy(&source_file, &dest).map_err(|e| {
            BronzeError::Io(format!(
                "Failed to copy {} to {}: {}",
                source_file.display(),
                dest.display(),
                e
            ))
        })?;
        let hash = content_hash(&dest)?;
        let changed = previous.as_deref() != Some(hash.as_str());

        if changed {
            tracing::info!("Staged {} for partition {} ({} bytes)", source, key, size);
        } else {
            tracing::info!(
                "Staged {} for partition {} ({} bytes, unchanged)",
                source,
                key,
                size
            );
        }

        Ok(StagedFile {
            source: source.to_string(),
            path: dest,
            size,
            content_hash: hash,
            changed,
        })
    }

    /// Load every staged file of the partition into its bronze table
    pub fn load(&self, key: &PartitionKey) -> BronzeResult<LoadReport> {
        let dir = self.layout.bronze_partition_dir(key);
        let files = discover_staged_files(&dir)?;
        if files.is_empty() {
            return Err(BronzeError::NothingStaged(dir));
        }

        let mut tables = Vec::with_capacity(files.len());
        for file in files {
            let source = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let table = bronze_table_name(&source);

            let rows = self
                .warehouse
                .replace_from_delimited(&table, &file, self.delimiter)?;
            tracing::info!("Loaded {} rows into {}", rows, table);

            tables.push(LoadedTable {
                table,
                source_file: file,
                rows,
            });
        }

        Ok(LoadReport {
            partition: key.clone(),
            tables,
        })
    }
}

/// Staged `*.csv` files of a partition directory, sorted by path
pub fn discover_staged_files(dir: &Path) -> BronzeResult<Vec<PathBuf>> {
    let pattern = format!("{}/*.csv", glob::Pattern::escape(&dir.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| BronzeError::InvalidPattern(format!("{}: {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!("Error accessing path: {}", e),
        }
    }
    files.sort();

    Ok(files)
}

fn content_hash(path: &Path) -> BronzeResult<String> {
    let content = fs::read(path)
        .map_err(|e| BronzeError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::MemoryWarehouse;
    use tempfile::TempDir;

    fn project() -> (TempDir, ProjectLayout) {
        let dir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());
        fs::create_dir_all(layout.bronze_source_dir()).unwrap();
        fs::write(
            layout.bronze_source_file("items"),
            "id;name\n1;Widget\n2;Gadget\n",
        )
        .unwrap();
        fs::write(
            layout.bronze_source_file("attributes"),
            "id;name\n1;color\n",
        )
        .unwrap();
        (dir, layout)
    }

    #[test]
    fn test_ingest_copies_source() {
        let (_dir, layout) = project();
        let warehouse = MemoryWarehouse::new();
        let ingestor = BronzeIngestor::new(&layout, &warehouse, ';');
        let key = PartitionKey::new("2025-02-01");

        let staged = ingestor.ingest("items", &key).unwrap();
        assert_eq!(staged.path, layout.bronze_partition_dir(&key).join("items.csv"));
        assert_eq!(staged.size, 26);
        assert_eq!(staged.content_hash.len(), 64);
        assert!(staged.changed);

        let again = ingestor.ingest("items", &key).unwrap();
        assert_eq!(again.content_hash, staged.content_hash);
        assert!(!again.changed);
    }

    #[test]
    fn test_ingest_missing_source() {
        let (_dir, layout) = project();
        let warehouse = MemoryWarehouse::new();
        let ingestor = BronzeIngestor::new(&layout, &warehouse, ';');

        let result = ingestor.ingest("values", &PartitionKey::new("2025-02-01"));
        assert!(matches!(result, Err(BronzeError::SourceMissing(_))));
    }

    #[test]
    fn test_load_replaces_tables_in_path_order() {
        let (_dir, layout) = project();
        let warehouse = MemoryWarehouse::new();
        let ingestor = BronzeIngestor::new(&layout, &warehouse, ';');
        let key = PartitionKey::new("2025-02-01");
        ingestor.ingest("items", &key).unwrap();
        ingestor.ingest("attributes", &key).unwrap();

        let report = ingestor.load(&key).unwrap();
        let tables: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(tables, vec!["bronze_attributes_source", "bronze_items_source"]);
        assert_eq!(report.total_rows(), 3);
        assert_eq!(
            warehouse.table("bronze_items_source").unwrap().row_count(),
            2
        );
    }

    #[test]
    fn test_load_without_staged_files() {
        let (_dir, layout) = project();
        let warehouse = MemoryWarehouse::new();
        let ingestor = BronzeIngestor::new(&layout, &warehouse, ';');

        let result = ingestor.load(&PartitionKey::new("2025-03-01"));
        assert!(matches!(result, Err(BronzeError::NothingStaged(_))));
    }
}
