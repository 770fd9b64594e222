//! CLI-specific error types

use thiserror::Error;

use crate::config::ConfigError;
use crate::partition::PartitionError;
use crate::pipeline::PipelineError;
use crate::query::QueryError;

/// Hint printed when no gold tables exist
pub const RUN_PIPELINE_HINT: &str = "Run the pipeline first to create gold layer data.";

/// Hint printed for malformed partition dates
pub const DATE_FORMAT_HINT: &str = "Use format: YYYY-MM-DD (e.g., 2025-02-01)";

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    /// Bad user input or a lookup that found nothing, with guidance lines
    #[error("{message}")]
    Validation { message: String, hints: Vec<String> },

    #[error("CDF not available: {0}")]
    ChangeFeedUnavailable(String),

    /// Collaborator failure while running a query
    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: QueryError,
    },

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to load config: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl CliError {
    /// Validation error without guidance
    pub fn validation(message: impl Into<String>) -> Self {
        CliError::Validation {
            message: message.into(),
            hints: Vec::new(),
        }
    }

    /// Validation error with guidance lines
    pub fn validation_with_hints(message: impl Into<String>, hints: Vec<String>) -> Self {
        CliError::Validation {
            message: message.into(),
            hints,
        }
    }

    /// Translate a query failure; `context` prefixes collaborator errors
    pub fn from_query(context: impl Into<String>, error: QueryError) -> Self {
        match error {
            QueryError::NoTables(_) => CliError::validation_with_hints(
                "No gold tables found in gold layer.",
                vec![RUN_PIPELINE_HINT.to_string()],
            ),
            QueryError::UnknownTable { table, available } => CliError::validation_with_hints(
                format!("Table '{}' not found.", table),
                vec![format!("Available tables: {}", available.join(", "))],
            ),
            QueryError::NoHistory(table) => {
                CliError::validation(format!("No versions available for table '{}'", table))
            }
            QueryError::InsufficientHistory { .. } => {
                CliError::validation("Need at least 2 versions to compare")
            }
            QueryError::ChangeFeedUnavailable(reason) => CliError::ChangeFeedUnavailable(reason),
            other => CliError::Query {
                context: context.into(),
                source: other,
            },
        }
    }

    /// Text printed for this error
    pub fn render(&self) -> String {
        match self {
            CliError::Validation { message, hints } => {
                let mut lines = vec![format!("❌ {}", message)];
                lines.extend(hints.iter().cloned());
                lines.join("\n")
            }
            CliError::ChangeFeedUnavailable(reason) => format!("⚠️  CDF not available: {}", reason),
            other => format!("Error: {}", other),
        }
    }

    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<PartitionError> for CliError {
    fn from(error: PartitionError) -> Self {
        match error {
            PartitionError::InvalidDate(value) => CliError::validation_with_hints(
                format!("Invalid partition date format: {}", value),
                vec![DATE_FORMAT_HINT.to_string()],
            ),
            other => CliError::validation(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        CliError::IoError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render_validation_with_hints() {
        let err = CliError::from_query(
            "Error querying table 'orders'",
            QueryError::UnknownTable {
                table: "orders".to_string(),
                available: vec!["attributes".to_string(), "items".to_string()],
            },
        );
        assert_eq!(
            err.render(),
            "❌ Table 'orders' not found.\nAvailable tables: attributes, items"
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_render_collaborator_error() {
        let err = CliError::from_query(
            "Error querying table 'items'",
            QueryError::Table(crate::table::TableError::NotFound(PathBuf::from("/g/items"))),
        );
        assert_eq!(
            err.render(),
            "Error: Error querying table 'items': Table error: Table not found: /g/items"
        );
    }

    #[test]
    fn test_render_invalid_date() {
        let err: CliError = PartitionError::InvalidDate("2025-2-1".to_string()).into();
        assert_eq!(
            err.render(),
            format!("❌ Invalid partition date format: 2025-2-1\n{}", DATE_FORMAT_HINT)
        );
    }

    #[test]
    fn test_render_change_feed_warning() {
        let err = CliError::ChangeFeedUnavailable("not enabled".to_string());
        assert_eq!(err.render(), "⚠️  CDF not available: not enabled");
    }
}
