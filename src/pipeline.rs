//! End-to-end pipeline for one partition
//!
//! Runs ingest, load, transform, materialize and export strictly in that
//! order and stops at the first failure. Partition bookkeeping is left to the
//! caller: at most one run per partition key may be active at a time.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::bronze::{BronzeError, BronzeIngestor, LoadReport, StagedFile};
use crate::config::PipelineConfig;
use crate::gold::{GoldError, GoldMaterializer, MaterializeOutcome};
use crate::partition::{PartitionKey, ProjectLayout};
use crate::silver::{ExportedFile, SilverError, SilverExporter};
use crate::table::VersionedTableStore;
use crate::transform::{ModelSet, TransformError, TransformReport, TransformRunner};
use crate::warehouse::Warehouse;

/// Pipeline stage names, in execution order
pub const STAGES: [&str; 5] = ["ingest", "load", "transform", "materialize", "export"];

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage 'ingest' failed for source {source_name}: {error}")]
    Ingest {
        source_name: String,
        #[source]
        error: BronzeError,
    },

    #[error("Stage 'load' failed: {0}")]
    Load(#[source] BronzeError),

    #[error("Stage 'transform' failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Stage 'materialize' failed: {0}")]
    Materialize(#[from] GoldError),

    #[error("Stage 'export' failed: {0}")]
    Export(#[from] SilverError),
}

impl PipelineError {
    /// Stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Ingest { .. } => STAGES[0],
            PipelineError::Load(_) => STAGES[1],
            PipelineError::Transform(_) => STAGES[2],
            PipelineError::Materialize(_) => STAGES[3],
            PipelineError::Export(_) => STAGES[4],
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Everything one partition run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub partition: PartitionKey,
    pub started_at: DateTime<Utc>,
    pub staged: Vec<StagedFile>,
    pub load: LoadReport,
    pub transform: TransformReport,
    pub gold: Vec<MaterializeOutcome>,
    pub silver: Vec<ExportedFile>,
    pub duration_ms: u64,
}

/// Medallion pipeline over its three collaborators
pub struct Pipeline<'a, W, T, S>
where
    W: Warehouse,
    T: TransformRunner,
    S: VersionedTableStore,
{
    config: &'a PipelineConfig,
    layout: &'a ProjectLayout,
    warehouse: &'a W,
    transformer: &'a T,
    store: &'a S,
}

impl<'a, W, T, S> Pipeline<'a, W, T, S>
where
    W: Warehouse,
    T: TransformRunner,
    S: VersionedTableStore,
{
    pub fn new(
        config: &'a PipelineConfig,
        layout: &'a ProjectLayout,
        warehouse: &'a W,
        transformer: &'a T,
        store: &'a S,
    ) -> Self {
        Self {
            config,
            layout,
            warehouse,
            transformer,
            store,
        }
    }

    fn bronze(&self) -> BronzeIngestor<'a, W> {
        BronzeIngestor::new(self.layout, self.warehouse, self.config.ingest.delimiter)
    }

    /// Stage every configured source into the partition directory
    pub fn ingest(&self, key: &PartitionKey) -> PipelineResult<Vec<StagedFile>> {
        let bronze = self.bronze();
        self.config
            .ingest
            .sources
            .iter()
            .map(|source| {
                bronze
                    .ingest(source, key)
                    .map_err(|error| PipelineError::Ingest {
                        source_name: source.clone(),
                        error,
                    })
            })
            .collect()
    }

    /// Load the partition's staged files into the bronze tables
    pub fn load(&self, key: &PartitionKey) -> PipelineResult<LoadReport> {
        self.bronze().load(key).map_err(PipelineError::Load)
    }

    /// Run the configured transformation models
    pub fn transform(&self, key: &PartitionKey) -> PipelineResult<TransformReport> {
        let models = ModelSet::new(self.config.transform.models.clone());
        Ok(self.transformer.run(key, &models)?)
    }

    /// Write the gold snapshots into the versioned tables
    pub fn materialize(&self, key: &PartitionKey) -> PipelineResult<Vec<MaterializeOutcome>> {
        let gold = GoldMaterializer::new(
            self.layout,
            self.warehouse,
            self.store,
            &self.config.gold.entities,
        );
        Ok(gold.materialize(key)?)
    }

    /// Export the silver tables to the partition directory
    pub fn export_silver(&self, key: &PartitionKey) -> PipelineResult<Vec<ExportedFile>> {
        let silver = SilverExporter::new(self.layout, self.warehouse, &self.config.silver.entities);
        Ok(silver.export(key)?)
    }

    /// Run every stage for one partition
    pub fn run(&self, key: &PartitionKey) -> PipelineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!("Starting run {} for partition {}", run_id, key);

        let staged = self.ingest(key)?;
        let load = self.load(key)?;
        let transform = self.transform(key)?;
        let gold = self.materialize(key)?;
        let silver = self.export_silver(key)?;

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Finished run {} for partition {} in {}ms",
            run_id,
            key,
            duration_ms
        );

        Ok(RunReport {
            run_id,
            partition: key.clone(),
            started_at,
            staged,
            load,
            transform,
            gold,
            silver,
            duration_ms,
        })
    }

    /// Run several partitions sequentially, stopping at the first failure
    pub fn run_all(&self, keys: &[PartitionKey]) -> PipelineResult<Vec<RunReport>> {
        keys.iter().map(|key| self.run(key)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gold::MaterializeAction;
    use crate::rowset::{ColumnInfo, RowSet};
    use crate::table::MemoryTableStore;
    use crate::transform::RecordingRunner;
    use crate::warehouse::MemoryWarehouse;
    use serde_json::json;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn project() -> (TempDir, ProjectLayout) {
        let dir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());
        std::fs::create_dir_all(layout.bronze_source_dir()).unwrap();
        std::fs::write(layout.bronze_source_file("items"), "id;name\n1;Widget\n").unwrap();
        std::fs::write(layout.bronze_source_file("attributes"), "id;name\n1;color\n").unwrap();
        (dir, layout)
    }

    /// Runner standing in for the SQL models: fills silver_* and gold_* tables
    fn models(warehouse: Rc<MemoryWarehouse>) -> RecordingRunner {
        RecordingRunner::with_hook(move |key| {
            let columns = vec![
                ColumnInfo::new("id", "BIGINT"),
                ColumnInfo::new("partition_date", "VARCHAR"),
            ];
            let rows = RowSet::new(columns, vec![json!({"id": 1, "partition_date": key.as_str()})]);
            let values = RowSet::new(
                vec![
                    ColumnInfo::new("item_id", "BIGINT"),
                    ColumnInfo::new("attribute_id", "BIGINT"),
                ],
                vec![json!({"item_id": 1, "attribute_id": 1})],
            );
            for entity in ["items", "attributes"] {
                warehouse.put_table(&format!("silver_{}", entity), rows.clone());
                warehouse.put_table(&format!("gold_{}", entity), rows.clone());
            }
            warehouse.put_table("silver_values", values.clone());
            warehouse.put_table("gold_values", values);
            Ok(())
        })
    }

    #[test]
    fn test_run_executes_every_stage() {
        let (_dir, layout) = project();
        let config = PipelineConfig::new();
        let warehouse = Rc::new(MemoryWarehouse::new());
        let runner = models(warehouse.clone());
        let store = MemoryTableStore::new();
        let pipeline = Pipeline::new(&config, &layout, warehouse.as_ref(), &runner, &store);
        let key = PartitionKey::new("2025-02-01");

        let report = pipeline.run(&key).unwrap();

        assert_eq!(report.partition, key);
        assert_eq!(report.staged.len(), 2);
        assert_eq!(report.load.tables.len(), 2);
        assert_eq!(report.transform.models.len(), 8);
        assert_eq!(report.gold.len(), 3);
        assert!(report.gold.iter().all(|o| o.action == MaterializeAction::Created));
        assert_eq!(report.silver.len(), 3);
        assert!(layout.silver_partition_dir(&key).join("values.csv").is_file());

        let again = pipeline.run(&key).unwrap();
        assert_ne!(again.run_id, report.run_id);
        assert!(again.gold.iter().all(|o| o.version == 1));
    }

    #[test]
    fn test_run_stops_at_first_failure() {
        let (_dir, layout) = project();
        let config = PipelineConfig::new();
        let warehouse = MemoryWarehouse::new();
        let runner = RecordingRunner::with_hook(|_| {
            Err(TransformError::Failed {
                status: "exit status: 1".to_string(),
                output: "model failed".to_string(),
            })
        });
        let store = MemoryTableStore::new();
        let pipeline = Pipeline::new(&config, &layout, &warehouse, &runner, &store);

        let err = pipeline.run(&PartitionKey::new("2025-02-01")).unwrap_err();
        assert_eq!(err.stage(), "transform");
        assert!(store.list_tables(&layout.gold_root()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_source_fails_ingest() {
        let (_dir, layout) = project();
        let mut config = PipelineConfig::new();
        config.ingest.sources.push("prices".to_string());
        let warehouse = MemoryWarehouse::new();
        let runner = RecordingRunner::new();
        let store = MemoryTableStore::new();
        let pipeline = Pipeline::new(&config, &layout, &warehouse, &runner, &store);

        let err = pipeline.run(&PartitionKey::new("2025-02-01")).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Ingest { ref source_name, .. } if source_name == "prices"
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_run_all_sequential() {
        let (_dir, layout) = project();
        let config = PipelineConfig::new();
        let warehouse = Rc::new(MemoryWarehouse::new());
        let runner = models(warehouse.clone());
        let store = MemoryTableStore::new();
        let pipeline = Pipeline::new(&config, &layout, warehouse.as_ref(), &runner, &store);

        let keys = PartitionKey::daily_range("2025-02-01", "2025-02-03").unwrap();
        let reports = pipeline.run_all(&keys).unwrap();

        let partitions: Vec<String> = runner
            .calls()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect();
        assert_eq!(partitions, vec!["2025-02-01", "2025-02-02", "2025-02-03"]);
        assert_eq!(reports[2].gold[0].version, 2);
    }
}
