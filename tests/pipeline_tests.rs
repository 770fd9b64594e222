//! End-to-end pipeline tests against DuckDB and the Delta table store

#![cfg(all(feature = "duckdb-backend", feature = "delta-backend"))]

use medallion_lake::bronze::BronzeIngestor;
use medallion_lake::gold::MaterializeAction;
use medallion_lake::table::{ChangeType, DeltaTableStore, MergeKey, VersionedTableStore};
use medallion_lake::transform::{RecordingRunner, TransformError};
use medallion_lake::warehouse::{DuckDbWarehouse, Warehouse};
use medallion_lake::query::PartitionLookup;
use medallion_lake::{
    ColumnInfo, GoldQuery, PartitionKey, Pipeline, PipelineConfig, ProjectLayout, RowSet,
    ScanOrder,
};
use serde_json::json;
use tempfile::TempDir;

fn write_sources(layout: &ProjectLayout, items: &str, attributes: &str) {
    std::fs::create_dir_all(layout.bronze_source_dir()).unwrap();
    std::fs::write(layout.bronze_source_file("items"), items).unwrap();
    std::fs::write(layout.bronze_source_file("attributes"), attributes).unwrap();
}

/// Runner standing in for the SQL models, building silver and gold tables from bronze
fn sql_models(warehouse: DuckDbWarehouse) -> RecordingRunner {
    RecordingRunner::with_hook(move |key| {
        let sql = format!(
            "CREATE OR REPLACE TABLE silver_items AS
                SELECT CAST(id AS BIGINT) AS id, CAST(name AS VARCHAR) AS name,
                       DATE '{date}' AS partition_date
                FROM bronze_items_source ORDER BY id;
             CREATE OR REPLACE TABLE silver_attributes AS
                SELECT CAST(id AS BIGINT) AS id, CAST(name AS VARCHAR) AS name,
                       DATE '{date}' AS partition_date
                FROM bronze_attributes_source ORDER BY id;
             CREATE OR REPLACE TABLE silver_values AS
                SELECT i.id AS item_id, a.id AS attribute_id, i.name || ':' || a.name AS value
                FROM silver_items i CROSS JOIN silver_attributes a
                ORDER BY item_id, attribute_id;
             CREATE OR REPLACE TABLE gold_items AS SELECT * FROM silver_items;
             CREATE OR REPLACE TABLE gold_attributes AS SELECT * FROM silver_attributes;
             CREATE OR REPLACE TABLE gold_values AS SELECT * FROM silver_values;",
            date = key.as_str()
        );
        warehouse
            .execute_batch(&sql)
            .map_err(|e| TransformError::Failed {
                status: "exit status: 1".to_string(),
                output: e.to_string(),
            })
    })
}

#[test]
fn test_bronze_reload_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let layout = ProjectLayout::new(dir.path());
    write_sources(&layout, "id;name\n1;Widget\n2;Gadget\n", "id;name\n1;color\n");
    let warehouse = DuckDbWarehouse::new(layout.warehouse_path());
    let bronze = BronzeIngestor::new(&layout, &warehouse, ';');
    let key = PartitionKey::new("2025-02-01");

    bronze.ingest("items", &key).unwrap();
    let first = bronze.load(&key).unwrap();
    let before = warehouse.read_table("bronze_items_source").unwrap();

    let restaged = bronze.ingest("items", &key).unwrap();
    let second = bronze.load(&key).unwrap();
    let after = warehouse.read_table("bronze_items_source").unwrap();

    assert!(!restaged.changed);
    assert_eq!(first.total_rows(), 2);
    assert_eq!(second.total_rows(), 2);
    assert_eq!(before, after);
}

#[test]
fn test_delta_store_merge_upserts_on_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gold").join("items");
    let store = DeltaTableStore::new().unwrap();
    let snapshot = |rows: &[(i64, &str)]| {
        RowSet::new(
            vec![
                ColumnInfo::new("id", "BIGINT"),
                ColumnInfo::new("name", "VARCHAR"),
            ],
            rows.iter()
                .map(|(id, name)| json!({"id": id, "name": name}))
                .collect(),
        )
    };

    let created = store
        .create(&path, &snapshot(&[(1, "one"), (2, "two"), (3, "three")]))
        .unwrap();
    assert_eq!(created.version, 0);
    let record = store
        .merge(
            &path,
            &snapshot(&[(2, "two v2"), (3, "three"), (4, "four")]),
            &MergeKey::new(["id"]),
        )
        .unwrap();
    assert_eq!(record.version, 1);

    let latest = store.read_latest(&path).unwrap();
    let mut rows: Vec<(i64, String)> = latest
        .rows
        .iter()
        .map(|row| {
            (
                row["id"].as_i64().unwrap(),
                row["name"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (1, "one".to_string()),
            (2, "two v2".to_string()),
            (3, "three".to_string()),
            (4, "four".to_string()),
        ]
    );

    // Row 3 is unchanged, so it is not part of the change feed
    let batches = store.change_feed(&path, 0, 1).unwrap();
    let mut changes: Vec<(i64, ChangeType)> = batches
        .iter()
        .flat_map(|b| b.records.iter())
        .map(|r| (r.row["id"].as_i64().unwrap(), r.change_type))
        .collect();
    changes.sort_by_key(|(id, _)| *id);
    assert_eq!(
        changes,
        vec![(2, ChangeType::Update), (4, ChangeType::Insert)]
    );
}

#[test]
fn test_pipeline_two_partitions_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::new();
    let layout = config.layout(dir.path());
    let warehouse = DuckDbWarehouse::new(layout.warehouse_path());
    let runner = sql_models(warehouse.clone());
    let store = DeltaTableStore::new().unwrap();
    let pipeline = Pipeline::new(&config, &layout, &warehouse, &runner, &store);

    write_sources(&layout, "id;name\n1;Widget\n2;Gadget\n", "id;name\n1;color\n");
    let day_one = pipeline.run(&PartitionKey::new("2025-02-01")).unwrap();
    assert!(day_one
        .gold
        .iter()
        .all(|o| o.action == MaterializeAction::Created && o.version == 0));
    assert!(layout
        .silver_partition_dir(&PartitionKey::new("2025-02-01"))
        .join("values.csv")
        .is_file());

    write_sources(
        &layout,
        "id;name\n1;Widget v2\n2;Gadget\n3;Gizmo\n",
        "id;name\n1;color\n2;size\n",
    );
    let day_two = pipeline.run(&PartitionKey::new("2025-02-02")).unwrap();
    assert!(day_two
        .gold
        .iter()
        .all(|o| o.action == MaterializeAction::Merged && o.version == 1));

    let query = GoldQuery::new(&store, layout.gold_root());
    assert_eq!(
        query.list_tables().unwrap(),
        vec!["attributes", "items", "values"]
    );

    match query
        .find_partition("items", "2025-02-01", ScanOrder::NewestFirst)
        .unwrap()
    {
        PartitionLookup::Found { version, rows } => {
            assert_eq!(version, 0);
            assert_eq!(rows.row_count(), 2);
        }
        other => panic!("unexpected lookup: {:?}", other),
    }

    let info = query.info("items").unwrap();
    assert_eq!(info.row_count, 3);
    assert_eq!(info.version_count, 2);
    assert_eq!(info.partition_dates, vec!["2025-02-02"]);

    // (1,1) changed value; (2,1) is unchanged; four pairs are new
    let diff = query.diff("values", None).unwrap();
    assert_eq!(diff.total_changes, 5);
    let count = |change_type: ChangeType| {
        diff.breakdown
            .iter()
            .find(|(t, _)| *t == change_type)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    assert_eq!(count(ChangeType::Update), 1);
    assert_eq!(count(ChangeType::Insert), 4);
}

#[test]
fn test_corrupt_gold_table_is_recreated() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::new();
    let layout = config.layout(dir.path());
    let warehouse = DuckDbWarehouse::new(layout.warehouse_path());
    let runner = sql_models(warehouse.clone());
    let store = DeltaTableStore::new().unwrap();
    let pipeline = Pipeline::new(&config, &layout, &warehouse, &runner, &store);
    write_sources(&layout, "id;name\n1;Widget\n", "id;name\n1;color\n");

    // A directory without a transaction log cannot be opened as a table
    std::fs::create_dir_all(layout.gold_table_path("items").join("junk")).unwrap();

    let report = pipeline.run(&PartitionKey::new("2025-02-01")).unwrap();
    let items = report.gold.iter().find(|o| o.entity == "items").unwrap();
    assert_eq!(items.action, MaterializeAction::Recreated);
    assert_eq!(items.version, 0);
    assert_eq!(store.history(&layout.gold_table_path("items")).unwrap().len(), 1);
}
