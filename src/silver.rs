//! Silver layer: export per-partition snapshots to delimited files

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::{PartitionKey, ProjectLayout};
use crate::warehouse::{Warehouse, WarehouseError};

/// Delimiter of exported silver files
pub const SILVER_DELIMITER: char = ',';

#[derive(Error, Debug)]
pub enum SilverError {
    #[error("Failed to export silver table {entity}: {source}")]
    Export {
        entity: String,
        #[source]
        source: WarehouseError,
    },
}

pub type SilverResult<T> = Result<T, SilverError>;

/// One exported silver file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub entity: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Warehouse table name for a silver entity
pub fn silver_table_name(entity: &str) -> String {
    format!("silver_{}", entity)
}

/// Exports `silver_<entity>` tables into the partition directory
pub struct SilverExporter<'a, W: Warehouse> {
    layout: &'a ProjectLayout,
    warehouse: &'a W,
    entities: &'a [String],
}

impl<'a, W: Warehouse> SilverExporter<'a, W> {
    pub fn new(layout: &'a ProjectLayout, warehouse: &'a W, entities: &'a [String]) -> Self {
        Self {
            layout,
            warehouse,
            entities,
        }
    }

    /// Write `data/silver/<key>/<entity>.csv` for every entity, overwriting
    pub fn export(&self, key: &PartitionKey) -> SilverResult<Vec<ExportedFile>> {
        let dir = self.layout.silver_partition_dir(key);
        let mut files = Vec::with_capacity(self.entities.len());

        for entity in self.entities {
            let path = dir.join(format!("{}.csv", entity));
            let rows = self
                .warehouse
                .export_delimited(&silver_table_name(entity), &path, SILVER_DELIMITER)
                .map_err(|source| SilverError::Export {
                    entity: entity.clone(),
                    source,
                })?;
            tracing::info!("Exported {} rows of {} to {}", rows, entity, path.display());

            files.push(ExportedFile {
                entity: entity.clone(),
                path,
                rows,
            });
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowset::{ColumnInfo, RowSet};
    use crate::warehouse::MemoryWarehouse;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_export_writes_partition_files() {
        let dir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let warehouse = MemoryWarehouse::new();
        let columns = vec![ColumnInfo::new("id", "BIGINT")];
        warehouse.put_table(
            "silver_items",
            RowSet::new(columns.clone(), vec![json!({"id": 1}), json!({"id": 2})]),
        );
        warehouse.put_table("silver_attributes", RowSet::empty(columns));

        let entities = vec!["items".to_string(), "attributes".to_string()];
        let exporter = SilverExporter::new(&layout, &warehouse, &entities);
        let key = PartitionKey::new("2025-02-01");

        let files = exporter.export(&key).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].rows, 2);
        assert_eq!(files[1].rows, 0);
        assert_eq!(
            files[0].path,
            layout.silver_partition_dir(&key).join("items.csv")
        );
        assert_eq!(std::fs::read_to_string(&files[1].path).unwrap(), "id\n");

        // Re-export overwrites
        assert_eq!(exporter.export(&key).unwrap()[0].rows, 2);
    }

    #[test]
    fn test_missing_table_names_entity() {
        let dir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let warehouse = MemoryWarehouse::new();
        let entities = vec!["values".to_string()];

        let result = SilverExporter::new(&layout, &warehouse, &entities)
            .export(&PartitionKey::new("2025-02-01"));
        assert!(matches!(result, Err(SilverError::Export { entity, .. }) if entity == "values"));
    }
}
