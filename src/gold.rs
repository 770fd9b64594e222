//! Gold layer: materialize warehouse snapshots into versioned tables

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GoldEntity;
use crate::partition::{PartitionKey, ProjectLayout};
use crate::table::{TableError, TableState, VersionedTableStore};
use crate::warehouse::{Warehouse, WarehouseError};

/// Errors raised while materializing gold tables
#[derive(Error, Debug)]
pub enum GoldError {
    #[error("Failed to read snapshot of {entity}: {source}")]
    Warehouse {
        entity: String,
        #[source]
        source: WarehouseError,
    },

    #[error("Failed to write gold table {entity}: {source}")]
    Table {
        entity: String,
        #[source]
        source: TableError,
    },
}

/// Result type for gold operations
pub type GoldResult<T> = Result<T, GoldError>;

/// What happened to one gold table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeAction {
    /// No table existed; version 0 written
    Created,
    /// Snapshot merged into the existing table
    Merged,
    /// Unreadable state discarded and version 0 written
    Recreated,
}

/// Result of materializing one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeOutcome {
    pub entity: String,
    pub action: MaterializeAction,
    /// Version written by this run
    pub version: u64,
    /// Rows in the warehouse snapshot
    pub source_rows: usize,
    pub metrics: BTreeMap<String, u64>,
}

/// Writes gold warehouse tables into the versioned store
pub struct GoldMaterializer<'a, W: Warehouse, S: VersionedTableStore> {
    layout: &'a ProjectLayout,
    warehouse: &'a W,
    store: &'a S,
    entities: &'a [GoldEntity],
}

impl<'a, W: Warehouse, S: VersionedTableStore> GoldMaterializer<'a, W, S> {
    pub fn new(
        layout: &'a ProjectLayout,
        warehouse: &'a W,
        store: &'a S,
        entities: &'a [GoldEntity],
    ) -> Self {
        Self {
            layout,
            warehouse,
            store,
            entities,
        }
    }

    /// Materialize every entity in order
    ///
    /// Each entity commits independently; a failure leaves earlier commits
    /// in place.
    pub fn materialize(&self, key: &PartitionKey) -> GoldResult<Vec<MaterializeOutcome>> {
        let mut outcomes = Vec::with_capacity(self.entities.len());
        for entity in self.entities {
            outcomes.push(self.materialize_entity(entity, key)?);
        }
        Ok(outcomes)
    }

    fn materialize_entity(
        &self,
        entity: &GoldEntity,
        key: &PartitionKey,
    ) -> GoldResult<MaterializeOutcome> {
        let snapshot = self
            .warehouse
            .read_table(&entity.table)
            .map_err(|source| GoldError::Warehouse {
                entity: entity.name.clone(),
                source,
            })?;
        let path = self.layout.gold_table_path(&entity.name);
        let table_err = |source: TableError| GoldError::Table {
            entity: entity.name.clone(),
            source,
        };

        let state = self.store.probe(&path).map_err(table_err)?;
        let (action, record) = match state {
            TableState::Present { latest_version } => {
                tracing::info!(
                    "Merging {} rows into gold table {} (latest version {})",
                    snapshot.row_count(),
                    entity.name,
                    latest_version
                );
                let record = self
                    .store
                    .merge(&path, &snapshot, &entity.key())
                    .map_err(table_err)?;
                (MaterializeAction::Merged, record)
            }
            TableState::Absent => {
                tracing::info!(
                    "Creating gold table {} with {} rows",
                    entity.name,
                    snapshot.row_count()
                );
                let record = self.store.create(&path, &snapshot).map_err(table_err)?;
                (MaterializeAction::Created, record)
            }
            TableState::Unreadable { reason } => {
                tracing::warn!(
                    "Gold table {} at {} is unreadable ({}); recreating it from partition {}",
                    entity.name,
                    path.display(),
                    reason,
                    key
                );
                let record = self.store.create(&path, &snapshot).map_err(table_err)?;
                (MaterializeAction::Recreated, record)
            }
        };

        tracing::info!(
            "Gold table {} is at version {} for partition {}",
            entity.name,
            record.version,
            key
        );

        Ok(MaterializeOutcome {
            entity: entity.name.clone(),
            action,
            version: record.version,
            source_rows: snapshot.row_count(),
            metrics: record.metrics,
        })
    }
}
