//! Medallion Lake - bronze/silver/gold pipeline with a versioned gold layer
//!
//! Provides:
//! - Per-partition staging of raw source files and bronze warehouse loads
//! - Invocation of the SQL transformation tool (dbt)
//! - Materialization of gold snapshots into versioned tables (merge on key)
//! - Per-partition silver exports
//! - A read path over the gold tables: time travel by partition, history, change diff
//!
//! Each external system sits behind a narrow trait: [`warehouse::Warehouse`],
//! [`transform::TransformRunner`] and [`table::VersionedTableStore`].

pub mod bronze;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod gold;
pub mod partition;
pub mod pipeline;
pub mod query;
pub mod rowset;
pub mod silver;
pub mod table;
pub mod transform;
pub mod warehouse;

pub use config::PipelineConfig;
pub use partition::{PartitionKey, ProjectLayout};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use query::{GoldQuery, ScanOrder};
pub use rowset::{ColumnInfo, Row, RowSet};
#[cfg(feature = "delta-backend")]
pub use table::DeltaTableStore;
pub use table::{MergeKey, TableState, VersionedTableStore};
#[cfg(feature = "duckdb-backend")]
pub use warehouse::DuckDbWarehouse;
pub use warehouse::Warehouse;

// In-memory collaborator doubles
#[cfg(any(test, feature = "test-utils"))]
pub use table::MemoryTableStore;
#[cfg(any(test, feature = "test-utils"))]
pub use warehouse::MemoryWarehouse;
