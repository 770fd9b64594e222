//! Row-level upsert emulating the Delta merge for the in-memory double

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::rowset::{Row, RowSet};
use crate::table::{ChangeType, MergeKey, TableError, TableResult, check_merge_source, key_of};

/// Result of merging a source snapshot into a target snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    /// Merged rows in target schema
    pub rows: RowSet,
    /// Changed rows in write order
    pub changes: Vec<(ChangeType, Row)>,
    /// Operation metrics
    pub metrics: BTreeMap<String, u64>,
}

/// Merge `source` into `target` on `key`
///
/// Matched rows are overwritten with the source values (update all), unmatched
/// source rows are appended (insert all). Target rows are never deleted. The
/// target schema wins: source values are projected onto target columns.
pub fn merge_rows(target: &RowSet, source: &RowSet, key: &MergeKey) -> TableResult<MergeOutput> {
    let target_columns: Vec<&str> = target.column_names();
    // Duplicates are rejected below, once they match a target row
    check_merge_source(&target_columns, source, key)?;

    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, row) in target.rows.iter().enumerate() {
        if let Some(k) = key_of(row, key) {
            index.insert(k, i);
        }
    }

    let mut rows = target.rows.clone();
    let mut matched = vec![false; rows.len()];
    let mut updated = 0u64;
    let mut inserted_rows = Vec::new();
    let mut changes = Vec::new();

    for source_row in &source.rows {
        let projected = project(source_row, &target_columns);
        let matched_index = key_of(source_row, key).and_then(|k| index.get(&k).map(|i| (k, *i)));

        match matched_index {
            Some((k, i)) => {
                if matched[i] {
                    return Err(TableError::AmbiguousMerge(k));
                }
                matched[i] = true;
                if !same_values(&rows[i], &projected, &target_columns) {
                    rows[i] = projected.clone();
                    updated += 1;
                    changes.push((ChangeType::Update, projected));
                }
            }
            None => {
                inserted_rows.push(projected.clone());
                changes.push((ChangeType::Insert, projected));
            }
        }
    }

    let inserted = inserted_rows.len() as u64;
    rows.extend(inserted_rows);

    let mut metrics = BTreeMap::new();
    metrics.insert("num_source_rows".to_string(), source.row_count() as u64);
    metrics.insert("num_target_rows_inserted".to_string(), inserted);
    metrics.insert("num_target_rows_updated".to_string(), updated);
    metrics.insert(
        "num_target_rows_copied".to_string(),
        target.row_count() as u64 - updated,
    );
    metrics.insert("num_output_rows".to_string(), rows.len() as u64);

    Ok(MergeOutput {
        rows: RowSet::new(target.columns.clone(), rows),
        changes,
        metrics,
    })
}

/// Change records and metrics for a full (re)creation
pub fn creation_changes(snapshot: &RowSet) -> (Vec<(ChangeType, Row)>, BTreeMap<String, u64>) {
    let changes = snapshot
        .rows
        .iter()
        .map(|row| (ChangeType::Insert, row.clone()))
        .collect();

    let mut metrics = BTreeMap::new();
    metrics.insert("num_added_rows".to_string(), snapshot.row_count() as u64);
    metrics.insert("num_output_rows".to_string(), snapshot.row_count() as u64);

    (changes, metrics)
}

fn project(row: &Row, columns: &[&str]) -> Row {
    let mut map = Map::new();
    for column in columns {
        let value = row.get(*column).cloned().unwrap_or(Value::Null);
        map.insert(column.to_string(), value);
    }
    Value::Object(map)
}

fn same_values(a: &Row, b: &Row, columns: &[&str]) -> bool {
    columns.iter().all(|c| {
        a.get(*c).unwrap_or(&Value::Null) == b.get(*c).unwrap_or(&Value::Null)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowset::ColumnInfo;
    use serde_json::json;

    fn items(rows: Vec<Row>) -> RowSet {
        RowSet::new(
            vec![
                ColumnInfo::new("id", "BIGINT"),
                ColumnInfo::new("name", "VARCHAR"),
            ],
            rows,
        )
    }

    #[test]
    fn test_merge_updates_and_inserts() {
        let target = items(vec![
            json!({"id": 1, "name": "a"}),
            json!({"id": 2, "name": "b"}),
            json!({"id": 3, "name": "c"}),
        ]);
        let source = items(vec![
            json!({"id": 2, "name": "B"}),
            json!({"id": 3, "name": "c"}),
            json!({"id": 4, "name": "d"}),
        ]);

        let out = merge_rows(&target, &source, &MergeKey::new(["id"])).unwrap();

        assert_eq!(out.rows.row_count(), 4);
        assert_eq!(out.rows.rows[0], json!({"id": 1, "name": "a"}));
        assert_eq!(out.rows.rows[1], json!({"id": 2, "name": "B"}));
        assert_eq!(out.rows.rows[3], json!({"id": 4, "name": "d"}));
        assert_eq!(
            out.changes,
            vec![
                (ChangeType::Update, json!({"id": 2, "name": "B"})),
                (ChangeType::Insert, json!({"id": 4, "name": "d"})),
            ]
        );
        assert_eq!(out.metrics["num_target_rows_updated"], 1);
        assert_eq!(out.metrics["num_target_rows_inserted"], 1);
        assert_eq!(out.metrics["num_target_rows_copied"], 2);
    }

    #[test]
    fn test_merge_identical_snapshot_is_noop() {
        let target = items(vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})]);

        let out = merge_rows(&target, &target.clone(), &MergeKey::new(["id"])).unwrap();

        assert_eq!(out.rows, target);
        assert!(out.changes.is_empty());
    }

    #[test]
    fn test_merge_composite_key() {
        let columns = vec![
            ColumnInfo::new("item_id", "BIGINT"),
            ColumnInfo::new("attribute_id", "BIGINT"),
            ColumnInfo::new("value", "VARCHAR"),
        ];
        let target = RowSet::new(
            columns.clone(),
            vec![json!({"item_id": 1, "attribute_id": 1, "value": "red"})],
        );
        let source = RowSet::new(
            columns,
            vec![
                json!({"item_id": 1, "attribute_id": 1, "value": "blue"}),
                json!({"item_id": 1, "attribute_id": 2, "value": "small"}),
            ],
        );

        let key = MergeKey::new(["item_id", "attribute_id"]);
        let out = merge_rows(&target, &source, &key).unwrap();

        assert_eq!(out.rows.row_count(), 2);
        assert_eq!(out.rows.rows[0]["value"], json!("blue"));
    }

    #[test]
    fn test_merge_null_key_inserts() {
        let target = items(vec![json!({"id": null, "name": "x"})]);
        let source = items(vec![json!({"id": null, "name": "x"})]);

        let out = merge_rows(&target, &source, &MergeKey::new(["id"])).unwrap();
        assert_eq!(out.rows.row_count(), 2);
    }

    #[test]
    fn test_merge_projects_onto_target_schema() {
        let target = items(vec![json!({"id": 1, "name": "a"})]);
        let source = RowSet::new(
            vec![
                ColumnInfo::new("id", "BIGINT"),
                ColumnInfo::new("extra", "VARCHAR"),
            ],
            vec![json!({"id": 5, "extra": "ignored"})],
        );

        let out = merge_rows(&target, &source, &MergeKey::new(["id"])).unwrap();
        assert_eq!(out.rows.rows[1], json!({"id": 5, "name": null}));
    }

    #[test]
    fn test_merge_rejects_ambiguous_source() {
        let target = items(vec![json!({"id": 1, "name": "a"})]);
        let source = items(vec![json!({"id": 1, "name": "x"}), json!({"id": 1, "name": "y"})]);

        assert!(matches!(
            merge_rows(&target, &source, &MergeKey::new(["id"])),
            Err(TableError::AmbiguousMerge(_))
        ));
    }

    #[test]
    fn test_merge_missing_key_column() {
        let target = items(vec![]);
        assert!(matches!(
            merge_rows(&target, &target, &MergeKey::new(["sku"])),
            Err(TableError::MissingMergeKey(col)) if col == "sku"
        ));
    }
}
