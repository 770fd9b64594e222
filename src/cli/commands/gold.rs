//! Gold table query commands
//!
//! Handlers write to the given writer and return [`CliError`] for anything
//! that should end the process with exit code 1.

use std::io::Write;

use crate::cli::error::CliError;
use crate::partition::PartitionKey;
use crate::query::{DIFF_TABLE, GoldQuery, PartitionLookup, QueryError, ScanOrder};
use crate::rowset::{RowSet, format_as_table};
use crate::table::VersionedTableStore;

/// Default number of rows shown by `show`
pub const DEFAULT_LIMIT: usize = 10;

/// Arguments of the `show` command
#[derive(Debug, Clone)]
pub struct ShowArgs {
    pub table: String,
    pub limit: usize,
    pub partition: Option<String>,
}

/// List the gold tables
pub fn handle_list_tables<S: VersionedTableStore>(
    query: &GoldQuery<'_, S>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let tables = query
        .list_tables()
        .map_err(|e| CliError::from_query("Error listing tables", e))?;
    if tables.is_empty() {
        return Err(CliError::from_query(
            "Error listing tables",
            QueryError::NoTables(query.root().to_path_buf()),
        ));
    }

    writeln!(out, "📋 Available tables:")?;
    for table in tables {
        writeln!(out, "  • {}", table)?;
    }
    Ok(())
}

/// Show the first rows of a table, optionally from the version holding a partition
pub fn handle_show<S: VersionedTableStore>(
    query: &GoldQuery<'_, S>,
    args: &ShowArgs,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let table = args.table.as_str();
    let context = format!("Error querying table '{}'", table);
    query
        .resolve_table(table)
        .map_err(|e| CliError::from_query(context.as_str(), e))?;

    let Some(date) = args.partition.as_deref() else {
        let rows = query
            .latest(table)
            .map_err(|e| CliError::from_query(context.as_str(), e))?;
        writeln!(out, "📊 Querying {} (latest version)", table)?;
        return print_rows(table, &rows, args.limit, None, out);
    };

    PartitionKey::parse_date(date)?;

    let lookup = query
        .find_partition(table, date, ScanOrder::default())
        .map_err(|e| CliError::from_query(context.as_str(), e))?;

    match lookup {
        PartitionLookup::Found { version, rows } => {
            writeln!(
                out,
                "🕒 Time travel: Querying {} from partition {} (version {})",
                table, date, version
            )?;
            print_rows(table, &rows, args.limit, Some(date), out)
        }
        PartitionLookup::NotFound { available_dates } => {
            let mut hints = vec!["Available partition dates:".to_string()];
            match available_dates {
                Some(dates) => hints.extend(dates.iter().map(|d| format!("  • {}", d))),
                None => hints.push("  (Unable to retrieve available dates)".to_string()),
            }
            Err(CliError::validation_with_hints(
                format!("No data found for partition date: {}", date),
                hints,
            ))
        }
        PartitionLookup::NoVersions => Err(CliError::validation(format!(
            "No versions available for table '{}'",
            table
        ))),
    }
}

fn print_rows(
    table: &str,
    rows: &RowSet,
    limit: usize,
    partition: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if rows.is_empty() {
        writeln!(out, "📊 Table '{}' is empty", table)?;
        return Ok(());
    }

    let shown = rows.head(limit);
    match partition {
        Some(date) => writeln!(
            out,
            "📊 First {} rows from '{}' partition {} (total: {} rows):",
            shown.row_count(),
            table,
            date,
            rows.row_count()
        )?,
        None => writeln!(
            out,
            "📊 First {} rows from '{}' (total: {} rows):",
            shown.row_count(),
            table,
            rows.row_count()
        )?,
    }
    writeln!(out, "{}", format_as_table(&shown))?;
    Ok(())
}

/// Print row count, versions, partition dates and schema of a table
pub fn handle_info<S: VersionedTableStore>(
    query: &GoldQuery<'_, S>,
    table: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let summary = query.info(table).map_err(|e| {
        CliError::from_query(format!("Error getting info for table '{}'", table), e)
    })?;

    writeln!(out, "📋 Table: {}", summary.table)?;
    writeln!(out, "📊 Rows: {}", summary.row_count)?;
    writeln!(out, "🕒 Versions: {}", summary.version_count)?;
    if !summary.partition_dates.is_empty() {
        writeln!(out, "📅 Available partition dates:")?;
        for date in &summary.partition_dates {
            writeln!(out, "  • {}", date)?;
        }
    }
    writeln!(out, "🔧 Schema:")?;
    for column in &summary.schema {
        writeln!(out, "  • {}: {}", column.name, column.data_type)?;
    }
    Ok(())
}

/// Print the version history of a table, newest first
pub fn handle_versions<S: VersionedTableStore>(
    query: &GoldQuery<'_, S>,
    table: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let history = query.versions(table).map_err(|e| {
        CliError::from_query(format!("Error getting versions for table '{}'", table), e)
    })?;

    writeln!(out, "🕒 Versions for {}:", table)?;
    for record in history {
        writeln!(
            out,
            "  • Version {}: {}",
            record.version,
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC")
        )?;
    }
    Ok(())
}

/// Summarize the changes of the newest commit to the values table
pub fn handle_diff<S: VersionedTableStore>(
    query: &GoldQuery<'_, S>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let diff = query
        .diff(DIFF_TABLE, None)
        .map_err(|e| CliError::from_query("Error comparing versions", e))?;

    writeln!(
        out,
        "🔄 Changes in latest version ({} → {})",
        diff.bounds.from, diff.bounds.to
    )?;
    writeln!(out, "📊 Total changes: {}", diff.total_changes)?;
    if diff.breakdown.is_empty() {
        writeln!(out, "📊 No changes found")?;
    } else {
        writeln!(out, "📈 Breakdown:")?;
        for (change_type, count) in &diff.breakdown {
            writeln!(out, "  • {}: {}", change_type, count)?;
        }
    }
    Ok(())
}
