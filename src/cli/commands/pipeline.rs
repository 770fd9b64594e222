//! Pipeline commands: full runs, backfills and single stages

use std::io::Write;

use crate::cli::error::CliError;
use crate::partition::PartitionKey;
use crate::pipeline::{Pipeline, RunReport};
use crate::table::VersionedTableStore;
use crate::transform::TransformRunner;
use crate::warehouse::Warehouse;

/// A single pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Load,
    Transform,
    Materialize,
    ExportSilver,
}

/// Run the full pipeline for each partition in order
pub fn handle_run<W, T, S>(
    pipeline: &Pipeline<'_, W, T, S>,
    keys: &[PartitionKey],
    json: bool,
    out: &mut dyn Write,
) -> Result<(), CliError>
where
    W: Warehouse,
    T: TransformRunner,
    S: VersionedTableStore,
{
    if keys.is_empty() {
        return Err(CliError::InvalidArgument(
            "At least one partition date is required".to_string(),
        ));
    }

    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        let report = pipeline.run(key)?;
        if !json {
            print_report(&report, out)?;
        }
        reports.push(report);
    }

    if json {
        let content = serde_json::to_string_pretty(&reports)
            .map_err(|e| CliError::IoError(format!("Failed to serialize run report: {}", e)))?;
        writeln!(out, "{}", content)?;
    }
    Ok(())
}

/// Run the full pipeline for every day from `from` to `to` inclusive
pub fn handle_backfill<W, T, S>(
    pipeline: &Pipeline<'_, W, T, S>,
    from: &str,
    to: &str,
    json: bool,
    out: &mut dyn Write,
) -> Result<(), CliError>
where
    W: Warehouse,
    T: TransformRunner,
    S: VersionedTableStore,
{
    let keys = PartitionKey::daily_range(from, to)?;
    handle_run(pipeline, &keys, json, out)
}

/// Run one stage for one partition
pub fn handle_stage<W, T, S>(
    pipeline: &Pipeline<'_, W, T, S>,
    stage: Stage,
    key: &PartitionKey,
    out: &mut dyn Write,
) -> Result<(), CliError>
where
    W: Warehouse,
    T: TransformRunner,
    S: VersionedTableStore,
{
    match stage {
        Stage::Ingest => {
            for staged in pipeline.ingest(key)? {
                writeln!(
                    out,
                    "📥 Staged {} ({} bytes) -> {}",
                    staged.source,
                    staged.size,
                    staged.path.display()
                )?;
            }
        }
        Stage::Load => {
            let report = pipeline.load(key)?;
            for table in &report.tables {
                writeln!(out, "📥 Loaded {}: {} rows", table.table, table.rows)?;
            }
        }
        Stage::Transform => {
            let report = pipeline.transform(key)?;
            writeln!(
                out,
                "🔧 Ran {} models for partition {} in {}ms",
                report.models.len(),
                report.partition,
                report.duration_ms
            )?;
        }
        Stage::Materialize => {
            for outcome in pipeline.materialize(key)? {
                writeln!(
                    out,
                    "🏅 {}: {:?} version {} ({} rows)",
                    outcome.entity, outcome.action, outcome.version, outcome.source_rows
                )?;
            }
        }
        Stage::ExportSilver => {
            for file in pipeline.export_silver(key)? {
                writeln!(
                    out,
                    "📤 Exported {}: {} rows -> {}",
                    file.entity,
                    file.rows,
                    file.path.display()
                )?;
            }
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, out: &mut dyn Write) -> Result<(), CliError> {
    writeln!(
        out,
        "✅ Run {} for partition {} completed in {}ms",
        report.run_id, report.partition, report.duration_ms
    )?;
    writeln!(out, "  • staged {} source files", report.staged.len())?;
    for table in &report.load.tables {
        writeln!(out, "  • loaded {}: {} rows", table.table, table.rows)?;
    }
    writeln!(out, "  • ran {} models", report.transform.models.len())?;
    for outcome in &report.gold {
        writeln!(
            out,
            "  • gold {}: {:?} version {} ({} rows)",
            outcome.entity, outcome.action, outcome.version, outcome.source_rows
        )?;
    }
    for file in &report.silver {
        writeln!(out, "  • silver {}: {} rows", file.entity, file.rows)?;
    }
    Ok(())
}
