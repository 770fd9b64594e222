//! Delta Lake table store
//!
//! Each gold table is a Delta table written with the change data feed enabled.
//! All table IO goes through `deltalake`; row sets cross the boundary as Arrow
//! record batches. The store API is synchronous, so the store owns a
//! current-thread runtime and blocks on every operation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use deltalake::arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
};
use deltalake::arrow::compute::cast;
use deltalake::arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use deltalake::arrow::record_batch::RecordBatch;
use deltalake::arrow::util::display::{ArrayFormatter, FormatOptions};
use deltalake::datafusion::catalog::TableProvider;
use deltalake::datafusion::physical_plan::collect;
use deltalake::datafusion::prelude::SessionContext;
use deltalake::kernel::CommitInfo;
use deltalake::protocol::SaveMode;
use deltalake::delta_datafusion::DeltaCdfTableProvider;
use deltalake::{DeltaOps, DeltaTable, DeltaTableBuilder};
use serde_json::{Map, Value};
use tokio::runtime::Runtime;
use url::Url;

use super::{
    ChangeBatch, ChangeRecord, ChangeType, MergeKey, TableError, TableResult, TableState,
    VersionRecord, VersionedTableStore, check_merge_source, key_of, list_table_dirs,
};
use crate::rowset::{ColumnInfo, Row, RowSet};

/// Directory holding the Delta transaction log
const LOG_DIR: &str = "_delta_log";

/// Table property enabling the change data feed
const CHANGE_FEED_PROPERTY: &str = "delta.enableChangeDataFeed";

const CHANGE_TYPE_COLUMN: &str = "_change_type";
const COMMIT_VERSION_COLUMN: &str = "_commit_version";
const COMMIT_TIMESTAMP_COLUMN: &str = "_commit_timestamp";

/// Versioned table store backed by Delta tables on the local filesystem
#[derive(Debug)]
pub struct DeltaTableStore {
    runtime: Runtime,
}

impl DeltaTableStore {
    /// Create a store with its own runtime
    pub fn new() -> TableResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TableError::Io(format!("Failed to start table runtime: {}", e)))?;
        Ok(Self { runtime })
    }
}

impl VersionedTableStore for DeltaTableStore {
    fn probe(&self, path: &Path) -> TableResult<TableState> {
        if !path.exists() || is_empty_dir(path)? {
            return Ok(TableState::Absent);
        }
        if !path.join(LOG_DIR).is_dir() {
            return Ok(TableState::Unreadable {
                reason: format!("no transaction log in {}", path.display()),
            });
        }

        let state = match self.runtime.block_on(load(path, None)) {
            Ok(table) => match table_version(path, &table) {
                Ok(latest_version) => TableState::Present { latest_version },
                Err(e) => TableState::Unreadable {
                    reason: e.to_string(),
                },
            },
            Err(e) => TableState::Unreadable {
                reason: e.to_string(),
            },
        };
        Ok(state)
    }

    fn create(&self, path: &Path, snapshot: &RowSet) -> TableResult<VersionRecord> {
        clear_path(path)?;
        std::fs::create_dir_all(path)
            .map_err(|e| TableError::Io(format!("Failed to create {}: {}", path.display(), e)))?;

        let schema = Arc::new(Schema::new(
            snapshot
                .columns
                .iter()
                .map(|c| Field::new(&c.name, arrow_type(&c.data_type), true))
                .collect::<Vec<_>>(),
        ));
        let batch = rowset_to_batch(schema, snapshot)?;
        let url = table_url(path)?;

        self.runtime.block_on(async {
            let table = DeltaTableBuilder::from_uri(url)
                .map_err(engine)?
                .build()
                .map_err(engine)?;
            let table = DeltaOps::from(table)
                .write(vec![batch])
                .with_save_mode(SaveMode::Overwrite)
                .with_configuration([(CHANGE_FEED_PROPERTY, Some("true"))])
                .await
                .map_err(engine)?;
            latest_record(path, &table).await
        })
    }

    fn merge(
        &self,
        path: &Path,
        snapshot: &RowSet,
        key: &MergeKey,
    ) -> TableResult<VersionRecord> {
        self.runtime.block_on(async {
            let table = load(path, None).await?;
            let ctx = SessionContext::new();
            let target_schema: SchemaRef = Arc::new(
                ctx.read_table(Arc::new(table.clone()))
                    .map_err(engine)?
                    .schema()
                    .as_arrow()
                    .clone(),
            );
            let target_columns: Vec<&str> = target_schema
                .fields()
                .iter()
                .map(|f| f.name().as_str())
                .collect();

            let duplicates = check_merge_source(&target_columns, snapshot, key)?;
            if !duplicates.is_empty() {
                let existing = scan_keys(&ctx, &table, key).await?;
                if let Some(k) = duplicates.iter().find(|k| existing.contains(*k)) {
                    return Err(TableError::AmbiguousMerge(k.clone()));
                }
            }

            let value_columns: Vec<&str> = target_columns
                .iter()
                .copied()
                .filter(|c| !key.columns().iter().any(|k| k == c))
                .collect();
            let source = ctx
                .read_batch(rowset_to_batch(target_schema.clone(), snapshot)?)
                .map_err(engine)?;

            tracing::debug!("Merging into {} on {}", path.display(), key.predicate());
            let mut builder = DeltaOps::from(table)
                .merge(source, key.predicate())
                .with_source_alias("source")
                .with_target_alias("target");
            if !value_columns.is_empty() {
                let changed = value_columns
                    .iter()
                    .map(|c| format!("target.{c} IS DISTINCT FROM source.{c}"))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                builder = builder
                    .when_matched_update(|update| {
                        value_columns
                            .iter()
                            .fold(update.predicate(changed), |update, c| {
                                update.update(*c, format!("source.{}", c))
                            })
                    })
                    .map_err(engine)?;
            }
            let (table, _metrics) = builder
                .when_not_matched_insert(|insert| {
                    target_columns
                        .iter()
                        .fold(insert, |insert, c| insert.set(*c, format!("source.{}", c)))
                })
                .map_err(engine)?
                .await
                .map_err(engine)?;

            latest_record(path, &table).await
        })
    }

    fn read_latest(&self, path: &Path) -> TableResult<RowSet> {
        self.runtime.block_on(async {
            let table = load(path, None).await?;
            scan(table).await
        })
    }

    fn read_version(&self, path: &Path, version: u64) -> TableResult<RowSet> {
        self.runtime.block_on(async {
            let latest = table_version(path, &load(path, None).await?)?;
            if version > latest {
                return Err(TableError::VersionNotFound {
                    path: path.to_path_buf(),
                    version,
                });
            }

            let table = load(path, Some(version))
                .await
                .map_err(|e| TableError::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!("version {} cannot be loaded: {}", version, e),
                })?;
            scan(table).await
        })
    }

    fn history(&self, path: &Path) -> TableResult<Vec<VersionRecord>> {
        self.runtime.block_on(async {
            let table = load(path, None).await?;
            let latest = table_version(path, &table)?;
            let commits = table.history(None).await.map_err(engine)?;

            // Newest first, one commit per version
            Ok(commits
                .into_iter()
                .zip((0..=latest).rev())
                .map(|(info, version)| version_record(version, &info))
                .collect())
        })
    }

    fn change_feed(
        &self,
        path: &Path,
        from_version: u64,
        to_version: u64,
    ) -> TableResult<Vec<ChangeBatch>> {
        if from_version > to_version {
            return Err(TableError::ChangeFeedUnavailable(format!(
                "start version {} is after end version {}",
                from_version, to_version
            )));
        }

        self.runtime.block_on(async {
            let table = load(path, None).await?;
            let latest = table_version(path, &table)?;
            if to_version > latest {
                return Err(TableError::VersionNotFound {
                    path: path.to_path_buf(),
                    version: to_version,
                });
            }
            if from_version == to_version {
                return Ok(Vec::new());
            }

            read_changes(table, from_version, to_version).await
        })
    }

    fn list_tables(&self, root: &Path) -> TableResult<Vec<String>> {
        list_table_dirs(root)
    }
}

fn engine(error: impl std::fmt::Display) -> TableError {
    TableError::Engine(error.to_string())
}

fn unavailable(error: impl std::fmt::Display) -> TableError {
    TableError::ChangeFeedUnavailable(error.to_string())
}

fn table_url(path: &Path) -> TableResult<Url> {
    let absolute = std::path::absolute(path)
        .map_err(|e| TableError::Io(format!("Failed to resolve {}: {}", path.display(), e)))?;
    Url::from_directory_path(&absolute)
        .map_err(|_| TableError::Io(format!("Invalid table path: {}", absolute.display())))
}

fn is_empty_dir(path: &Path) -> TableResult<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    let mut entries = std::fs::read_dir(path)
        .map_err(|e| TableError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(entries.next().is_none())
}

/// Remove whatever is stored at `path`
fn clear_path(path: &Path) -> TableResult<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        return Ok(());
    };
    result.map_err(|e| TableError::Io(format!("Failed to clear {}: {}", path.display(), e)))
}

async fn load(path: &Path, version: Option<u64>) -> TableResult<DeltaTable> {
    if !path.join(LOG_DIR).is_dir() {
        return Err(TableError::NotFound(path.to_path_buf()));
    }

    let mut builder = DeltaTableBuilder::from_uri(table_url(path)?).map_err(engine)?;
    if let Some(version) = version {
        builder = builder.with_version(version as i64);
    }
    builder.load().await.map_err(|e| TableError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn table_version(path: &Path, table: &DeltaTable) -> TableResult<u64> {
    table
        .version()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| TableError::Corrupt {
            path: path.to_path_buf(),
            reason: "table has no committed version".to_string(),
        })
}

/// History entry of the version a write just committed
async fn latest_record(path: &Path, table: &DeltaTable) -> TableResult<VersionRecord> {
    let version = table_version(path, table)?;
    let info = table
        .history(Some(1))
        .await
        .map_err(engine)?
        .into_iter()
        .next()
        .ok_or_else(|| TableError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("no commit info for version {}", version),
        })?;
    Ok(version_record(version, &info))
}

fn version_record(version: u64, info: &CommitInfo) -> VersionRecord {
    let timestamp = info
        .timestamp
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let metrics: BTreeMap<String, u64> = info
        .info
        .get("operationMetrics")
        .and_then(Value::as_object)
        .map(|metrics| {
            metrics
                .iter()
                .filter_map(|(name, value)| metric_value(value).map(|v| (name.clone(), v)))
                .collect()
        })
        .unwrap_or_default();

    VersionRecord {
        version,
        timestamp,
        operation: info
            .operation
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        metrics,
    }
}

fn metric_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

async fn scan(table: DeltaTable) -> TableResult<RowSet> {
    let ctx = SessionContext::new();
    let frame = ctx.read_table(Arc::new(table)).map_err(engine)?;
    let schema = frame.schema().as_arrow().clone();
    let batches = frame.collect().await.map_err(engine)?;
    batches_to_rowset(&schema, &batches)
}

/// Key strings of every target row
async fn scan_keys(
    ctx: &SessionContext,
    table: &DeltaTable,
    key: &MergeKey,
) -> TableResult<BTreeSet<String>> {
    let columns: Vec<&str> = key.columns().iter().map(String::as_str).collect();
    let frame = ctx
        .read_table(Arc::new(table.clone()))
        .map_err(engine)?
        .select_columns(&columns)
        .map_err(engine)?;
    let schema = frame.schema().as_arrow().clone();
    let batches = frame.collect().await.map_err(engine)?;

    let keys = batches_to_rowset(&schema, &batches)?;
    Ok(keys.rows.iter().filter_map(|row| key_of(row, key)).collect())
}

async fn read_changes(table: DeltaTable, from: u64, to: u64) -> TableResult<Vec<ChangeBatch>> {
    let ctx = SessionContext::new();
    let cdf = DeltaOps(table)
        .load_cdf()
        .with_starting_version(from as i64 + 1)
        .with_ending_version(to as i64);
    let plan = DeltaCdfTableProvider::try_new(cdf)
        .map_err(unavailable)?
        .scan(&ctx.state(), None, &[], None)
        .await
        .map_err(unavailable)?;
    let schema = plan.schema();
    let batches = collect(plan, ctx.task_ctx()).await.map_err(unavailable)?;
    let changes = batches_to_rowset(&schema, &batches)?;

    let mut by_version: BTreeMap<u64, Vec<ChangeRecord>> =
        (from + 1..=to).map(|v| (v, Vec::new())).collect();
    for mut row in changes.rows {
        let Some(fields) = row.as_object_mut() else {
            continue;
        };
        let change_type = match fields.remove(CHANGE_TYPE_COLUMN) {
            Some(Value::String(label)) => match label.as_str() {
                "insert" => ChangeType::Insert,
                "update_postimage" => ChangeType::Update,
                "delete" => ChangeType::Delete,
                // The pre-image duplicates the updated row
                "update_preimage" => continue,
                other => {
                    return Err(TableError::Serialization(format!(
                        "Unknown change type: {}",
                        other
                    )));
                }
            },
            other => {
                return Err(TableError::Serialization(format!(
                    "Change row without a change type: {:?}",
                    other
                )));
            }
        };
        let commit_version = fields
            .remove(COMMIT_VERSION_COLUMN)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                TableError::Serialization("Change row without a commit version".to_string())
            })?;
        fields.remove(COMMIT_TIMESTAMP_COLUMN);

        by_version
            .entry(commit_version)
            .or_default()
            .push(ChangeRecord {
                change_type,
                commit_version,
                row,
            });
    }

    Ok(by_version
        .into_iter()
        .map(|(version, records)| ChangeBatch { version, records })
        .collect())
}

/// Arrow type a warehouse column is stored as
fn arrow_type(data_type: &str) -> DataType {
    let upper = data_type.to_ascii_uppercase();
    match upper.as_str() {
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "UTINYINT" | "USMALLINT"
        | "UINTEGER" | "UBIGINT" => DataType::Int64,
        "FLOAT" | "REAL" | "DOUBLE" => DataType::Float64,
        "BOOLEAN" => DataType::Boolean,
        "DATE" => DataType::Date32,
        _ if upper.starts_with("DECIMAL") => DataType::Float64,
        _ => DataType::Utf8,
    }
}

/// SQL type name reported for an Arrow column
fn sql_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "BIGINT",
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "DOUBLE",
        DataType::Boolean => "BOOLEAN",
        DataType::Date32 | DataType::Date64 => "DATE",
        DataType::Timestamp(_, _) => "TIMESTAMP",
        _ => "VARCHAR",
    }
}

fn mismatch(column: &str, value: &Value, data_type: &DataType) -> TableError {
    TableError::SchemaMismatch(format!(
        "value {} of column '{}' does not fit {}",
        value, column, data_type
    ))
}

/// Build a record batch in `schema` from a row set; missing columns are null
fn rowset_to_batch(schema: SchemaRef, rowset: &RowSet) -> TableResult<RecordBatch> {
    let arrays = schema
        .fields()
        .iter()
        .map(|field| build_array(field.name(), field.data_type(), &rowset.rows))
        .collect::<TableResult<Vec<_>>>()?;
    RecordBatch::try_new(schema, arrays).map_err(engine)
}

fn build_array(column: &str, data_type: &DataType, rows: &[Row]) -> TableResult<ArrayRef> {
    let values: Vec<&Value> = rows
        .iter()
        .map(|row| row.get(column).unwrap_or(&Value::Null))
        .collect();

    let array: ArrayRef = match data_type {
        DataType::Int64 => {
            let ints = values
                .iter()
                .map(|v| match v {
                    Value::Null => Some(None),
                    Value::Number(n) => n.as_i64().map(Some),
                    Value::String(s) => s.parse::<i64>().ok().map(Some),
                    _ => None,
                }
                .ok_or_else(|| mismatch(column, v, data_type)))
                .collect::<TableResult<Vec<Option<i64>>>>()?;
            Arc::new(Int64Array::from(ints))
        }
        DataType::Float64 => {
            let floats = values
                .iter()
                .map(|v| match v {
                    Value::Null => Some(None),
                    Value::Number(n) => n.as_f64().map(Some),
                    Value::String(s) => s.parse::<f64>().ok().map(Some),
                    _ => None,
                }
                .ok_or_else(|| mismatch(column, v, data_type)))
                .collect::<TableResult<Vec<Option<f64>>>>()?;
            Arc::new(Float64Array::from(floats))
        }
        DataType::Boolean => {
            let bools = values
                .iter()
                .map(|v| match v {
                    Value::Null => Some(None),
                    Value::Bool(b) => Some(Some(*b)),
                    _ => None,
                }
                .ok_or_else(|| mismatch(column, v, data_type)))
                .collect::<TableResult<Vec<Option<bool>>>>()?;
            Arc::new(BooleanArray::from(bools))
        }
        DataType::Date32 => {
            let epoch = DateTime::<Utc>::UNIX_EPOCH.date_naive();
            let days = values
                .iter()
                .map(|v| match v {
                    Value::Null => Some(None),
                    Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| i32::try_from((d - epoch).num_days()).ok())
                        .map(Some),
                    _ => None,
                }
                .ok_or_else(|| mismatch(column, v, data_type)))
                .collect::<TableResult<Vec<Option<i32>>>>()?;
            Arc::new(Date32Array::from(days))
        }
        DataType::Utf8 => Arc::new(StringArray::from(text_values(&values))),
        other => {
            let text: ArrayRef = Arc::new(StringArray::from(text_values(&values)));
            cast(&text, other).map_err(engine)?
        }
    };
    Ok(array)
}

fn text_values(values: &[&Value]) -> Vec<Option<String>> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .collect()
}

fn batches_to_rowset(schema: &Schema, batches: &[RecordBatch]) -> TableResult<RowSet> {
    let columns: Vec<ColumnInfo> = schema
        .fields()
        .iter()
        .map(|f| ColumnInfo::new(f.name(), sql_type(f.data_type())))
        .collect();

    let mut rows = Vec::new();
    for batch in batches {
        let mut values = Vec::with_capacity(columns.len());
        for column in &columns {
            let array = batch.column_by_name(&column.name).ok_or_else(|| {
                TableError::SchemaMismatch(format!("column '{}' missing from scan", column.name))
            })?;
            values.push(array_values(array)?);
        }

        for i in 0..batch.num_rows() {
            let mut map = Map::new();
            for (column, column_values) in columns.iter().zip(&values) {
                map.insert(column.name.clone(), column_values[i].clone());
            }
            rows.push(Value::Object(map));
        }
    }

    Ok(RowSet::new(columns, rows))
}

/// JSON values of an Arrow column
fn array_values(array: &ArrayRef) -> TableResult<Vec<Value>> {
    let values = match array.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let ints = cast(array, &DataType::Int64).map_err(engine)?;
            ints.as_primitive::<Int64Type>()
                .iter()
                .map(|v| v.map(Value::from).unwrap_or(Value::Null))
                .collect()
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let floats = cast(array, &DataType::Float64).map_err(engine)?;
            floats
                .as_primitive::<Float64Type>()
                .iter()
                .map(|v| v.map(Value::from).unwrap_or(Value::Null))
                .collect()
        }
        DataType::Boolean => array
            .as_boolean()
            .iter()
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null))
            .collect(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Dictionary(_, _) => {
            let text = cast(array, &DataType::Utf8).map_err(engine)?;
            text.as_string::<i32>()
                .iter()
                .map(|v| v.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null))
                .collect()
        }
        _ => {
            let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())
                .map_err(engine)?;
            (0..array.len())
                .map(|i| {
                    if array.is_null(i) {
                        Value::Null
                    } else {
                        Value::String(formatter.value(i).to_string())
                    }
                })
                .collect()
        }
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn items(rows: &[(i64, &str)]) -> RowSet {
        RowSet::new(
            vec![
                ColumnInfo::new("id", "BIGINT"),
                ColumnInfo::new("name", "VARCHAR"),
            ],
            rows.iter()
                .map(|(id, name)| json!({"id": id, "name": name}))
                .collect(),
        )
    }

    fn sorted_pairs(rows: &RowSet) -> Vec<(i64, String)> {
        let mut pairs: Vec<(i64, String)> = rows
            .rows
            .iter()
            .map(|row| {
                (
                    row["id"].as_i64().unwrap(),
                    row["name"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn test_create_writes_first_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items");
        let store = DeltaTableStore::new().unwrap();

        let record = store.create(&path, &items(&[(1, "a"), (2, "b")])).unwrap();

        assert_eq!(record.version, 0);
        assert!(path.join(LOG_DIR).is_dir());
        assert_eq!(
            store.probe(&path).unwrap(),
            TableState::Present { latest_version: 0 }
        );
        let latest = store.read_latest(&path).unwrap();
        assert_eq!(latest.column_names(), vec!["id", "name"]);
        assert_eq!(latest.columns[0].data_type, "BIGINT");
        assert_eq!(sorted_pairs(&latest), vec![(1, "a".into()), (2, "b".into())]);
        assert_eq!(store.history(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_create_discards_existing_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items");
        let store = DeltaTableStore::new().unwrap();
        store.create(&path, &items(&[(1, "a")])).unwrap();
        store
            .merge(&path, &items(&[(2, "b")]), &MergeKey::new(["id"]))
            .unwrap();

        let record = store.create(&path, &items(&[(9, "z")])).unwrap();

        assert_eq!(record.version, 0);
        assert_eq!(store.history(&path).unwrap().len(), 1);
        assert_eq!(
            sorted_pairs(&store.read_latest(&path).unwrap()),
            vec![(9, "z".into())]
        );
    }

    #[test]
    fn test_merge_updates_changed_rows_and_inserts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items");
        let store = DeltaTableStore::new().unwrap();
        store.create(&path, &items(&[(1, "a"), (2, "b")])).unwrap();

        let record = store
            .merge(
                &path,
                &items(&[(1, "a"), (2, "B"), (3, "c")]),
                &MergeKey::new(["id"]),
            )
            .unwrap();

        assert_eq!(record.version, 1);
        assert_eq!(record.operation, "MERGE");
        assert_eq!(record.metrics.get("num_target_rows_inserted"), Some(&1));
        assert_eq!(
            sorted_pairs(&store.read_latest(&path).unwrap()),
            vec![(1, "a".into()), (2, "B".into()), (3, "c".into())]
        );
        assert_eq!(
            sorted_pairs(&store.read_version(&path, 0).unwrap()),
            vec![(1, "a".into()), (2, "b".into())]
        );

        let history = store.history(&path).unwrap();
        assert_eq!(
            history.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 0]
        );

        // Row 1 is unchanged, so only row 2 shows up as an update
        let batches = store.change_feed(&path, 0, 1).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].version, 1);
        let mut changes: Vec<(ChangeType, i64)> = batches[0]
            .records
            .iter()
            .map(|r| (r.change_type, r.row["id"].as_i64().unwrap()))
            .collect();
        changes.sort_by_key(|(_, id)| *id);
        assert_eq!(
            changes,
            vec![(ChangeType::Update, 2), (ChangeType::Insert, 3)]
        );
        assert!(batches[0].records.iter().all(|r| r.row.get(CHANGE_TYPE_COLUMN).is_none()));
    }

    #[test]
    fn test_merge_rejects_duplicate_keys_matching_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items");
        let store = DeltaTableStore::new().unwrap();
        store.create(&path, &items(&[(1, "a")])).unwrap();

        let result = store.merge(
            &path,
            &items(&[(1, "x"), (1, "y")]),
            &MergeKey::new(["id"]),
        );

        assert!(matches!(result, Err(TableError::AmbiguousMerge(_))));
        assert_eq!(
            store.probe(&path).unwrap(),
            TableState::Present { latest_version: 0 }
        );
    }

    #[test]
    fn test_merge_missing_key_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items");
        let store = DeltaTableStore::new().unwrap();
        store.create(&path, &items(&[(1, "a")])).unwrap();

        assert!(matches!(
            store.merge(&path, &items(&[(1, "a")]), &MergeKey::new(["sku"])),
            Err(TableError::MissingMergeKey(col)) if col == "sku"
        ));
    }

    #[test]
    fn test_version_and_range_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items");
        let store = DeltaTableStore::new().unwrap();
        store.create(&path, &items(&[(1, "a")])).unwrap();

        assert!(matches!(
            store.read_version(&path, 3),
            Err(TableError::VersionNotFound { version: 3, .. })
        ));
        assert!(matches!(
            store.change_feed(&path, 0, 2),
            Err(TableError::VersionNotFound { version: 2, .. })
        ));
        assert!(matches!(
            store.change_feed(&path, 1, 0),
            Err(TableError::ChangeFeedUnavailable(_))
        ));
        assert!(store.change_feed(&path, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_table_state_of_plain_directories() {
        let dir = TempDir::new().unwrap();
        let store = DeltaTableStore::new().unwrap();

        assert_eq!(
            store.probe(&dir.path().join("missing")).unwrap(),
            TableState::Absent
        );

        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert_eq!(store.probe(&empty).unwrap(), TableState::Absent);

        let junk = dir.path().join("junk");
        std::fs::create_dir_all(junk.join("part-0")).unwrap();
        assert!(matches!(
            store.probe(&junk).unwrap(),
            TableState::Unreadable { reason } if reason.contains("no transaction log")
        ));
        assert!(matches!(
            store.read_latest(&junk),
            Err(TableError::NotFound(_))
        ));
    }

    #[test]
    fn test_batch_conversion_keeps_types_and_nulls() {
        let rowset = RowSet::new(
            vec![
                ColumnInfo::new("id", "INTEGER"),
                ColumnInfo::new("day", "DATE"),
                ColumnInfo::new("active", "BOOLEAN"),
                ColumnInfo::new("score", "DOUBLE"),
            ],
            vec![
                json!({"id": 1, "day": "2025-02-01", "active": true, "score": 1.5}),
                json!({"id": 2, "day": null, "active": false}),
            ],
        );
        let schema = Arc::new(Schema::new(
            rowset
                .columns
                .iter()
                .map(|c| Field::new(&c.name, arrow_type(&c.data_type), true))
                .collect::<Vec<_>>(),
        ));

        let batch = rowset_to_batch(schema.clone(), &rowset).unwrap();
        let read = batches_to_rowset(&schema, &[batch]).unwrap();

        assert_eq!(read.columns[0].data_type, "BIGINT");
        assert_eq!(read.columns[1].data_type, "DATE");
        assert_eq!(read.rows[0]["day"], json!("2025-02-01"));
        assert_eq!(
            read.rows[1],
            json!({"id": 2, "day": null, "active": false, "score": null})
        );
    }

    #[test]
    fn test_unparseable_value_is_schema_mismatch() {
        let rowset = RowSet::new(
            vec![ColumnInfo::new("id", "BIGINT")],
            vec![json!({"id": "not a number"})],
        );
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, true)]));

        assert!(matches!(
            rowset_to_batch(schema, &rowset),
            Err(TableError::SchemaMismatch(_))
        ));
    }
}
