//! Transform stage: run the SQL transformation tool for a partition

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::{PARTITION_COLUMN, PartitionKey};

/// Lines of stdout kept in a failure message when stderr is empty
const OUTPUT_TAIL_LINES: usize = 20;

/// Errors raised by the transform stage
#[derive(Error, Debug)]
pub enum TransformError {
    /// The tool could not be started
    #[error("Failed to execute {executable}: {reason}")]
    SpawnFailed { executable: String, reason: String },

    /// The tool ran and reported failure
    #[error("Transformation failed ({status}): {output}")]
    Failed { status: String, output: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for transform operations
pub type TransformResult<T> = Result<T, TransformError>;

/// Ordered model names passed to the tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSet(Vec<String>);

impl ModelSet {
    /// Create a model set from names in dependency order
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(models.into_iter().map(Into::into).collect())
    }

    /// Model names
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Space-separated selector
    pub fn selector(&self) -> String {
        self.0.join(" ")
    }
}

impl Default for ModelSet {
    fn default() -> Self {
        Self::new([
            "bronze_items",
            "bronze_attributes",
            "silver_items",
            "silver_attributes",
            "silver_values",
            "gold_items",
            "gold_attributes",
            "gold_values",
        ])
    }
}

/// Outcome of a successful transformation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    /// Partition the models ran for
    pub partition: PartitionKey,
    /// Models that were run
    pub models: Vec<String>,
    /// Exit code of the tool, if it reported one
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Runs transformation models for one partition
pub trait TransformRunner {
    /// Run `models` with the partition passed as a variable
    fn run(&self, key: &PartitionKey, models: &ModelSet) -> TransformResult<TransformReport>;
}

/// Runs dbt as an external process
#[derive(Debug, Clone)]
pub struct DbtRunner {
    executable: PathBuf,
    project_dir: PathBuf,
}

impl DbtRunner {
    /// Create a runner for `executable` against the project in `project_dir`
    pub fn new(executable: impl Into<PathBuf>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            project_dir: project_dir.into(),
        }
    }

    /// Executable that will be spawned
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Arguments passed to the executable
    pub fn command_args(
        &self,
        key: &PartitionKey,
        models: &ModelSet,
    ) -> TransformResult<Vec<String>> {
        let mut vars = serde_json::Map::new();
        vars.insert(
            PARTITION_COLUMN.to_string(),
            serde_json::Value::String(key.as_str().to_string()),
        );
        let vars = serde_json::to_string(&vars)
            .map_err(|e| TransformError::Serialization(e.to_string()))?;

        Ok(vec![
            "run".to_string(),
            "--models".to_string(),
            models.selector(),
            "--vars".to_string(),
            vars,
            "--project-dir".to_string(),
            self.project_dir.to_string_lossy().into_owned(),
        ])
    }
}

impl TransformRunner for DbtRunner {
    fn run(&self, key: &PartitionKey, models: &ModelSet) -> TransformResult<TransformReport> {
        let args = self.command_args(key, models)?;
        tracing::info!(
            "Running {} for partition {}: {}",
            self.executable.display(),
            key,
            models.selector()
        );

        let start = Instant::now();
        let output = Command::new(&self.executable)
            .args(&args)
            .current_dir(&self.project_dir)
            .output()
            .map_err(|e| TransformError::SpawnFailed {
                executable: self.executable.display().to_string(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::info!("dbt: {}", line);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let output_text = if stderr.is_empty() {
                let lines: Vec<&str> = stdout.lines().collect();
                let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
                lines[start..].join("\n")
            } else {
                stderr
            };
            return Err(TransformError::Failed {
                status: output.status.to_string(),
                output: output_text,
            });
        }

        Ok(TransformReport {
            partition: key.clone(),
            models: models.names().to_vec(),
            exit_code: output.status.code(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::{RecordingRunner, TransformHook};

/// Test double of the transformation tool
#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use std::cell::RefCell;

    use super::{ModelSet, TransformReport, TransformResult, TransformRunner};
    use crate::partition::PartitionKey;

    /// Callback run by [`RecordingRunner`] in place of the real tool
    pub type TransformHook = Box<dyn Fn(&PartitionKey) -> TransformResult<()>>;

    /// Runner that records calls instead of spawning a process
    #[derive(Default)]
    pub struct RecordingRunner {
        calls: RefCell<Vec<(PartitionKey, Vec<String>)>>,
        hook: Option<TransformHook>,
    }

    impl RecordingRunner {
        /// Create a runner that only records
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a runner that runs `hook` on every call
        pub fn with_hook(hook: impl Fn(&PartitionKey) -> TransformResult<()> + 'static) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                hook: Some(Box::new(hook)),
            }
        }

        /// Recorded calls in order
        pub fn calls(&self) -> Vec<(PartitionKey, Vec<String>)> {
            self.calls.borrow().clone()
        }
    }

    impl TransformRunner for RecordingRunner {
        fn run(&self, key: &PartitionKey, models: &ModelSet) -> TransformResult<TransformReport> {
            self.calls
                .borrow_mut()
                .push((key.clone(), models.names().to_vec()));
            if let Some(hook) = &self.hook {
                hook(key)?;
            }

            Ok(TransformReport {
                partition: key.clone(),
                models: models.names().to_vec(),
                exit_code: Some(0),
                duration_ms: 0,
            })
        }
    }
}
