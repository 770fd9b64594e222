//! Pipeline configuration file support
//!
//! Handles parsing of `medallion.toml` configuration files and
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::partition::ProjectLayout;
use crate::table::MergeKey;

/// Default configuration filename
pub const CONFIG_FILENAME: &str = "medallion.toml";

/// Environment variable for the data directory
pub const ENV_DATA_DIR: &str = "MEDALLION_DATA_DIR";

/// Environment variable for the warehouse database path
pub const ENV_WAREHOUSE_PATH: &str = "MEDALLION_WAREHOUSE_PATH";

/// Environment variable for the dbt executable
pub const ENV_DBT_EXECUTABLE: &str = "MEDALLION_DBT_EXECUTABLE";

/// Errors raised while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Filesystem section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Data directory (relative to the project root, or absolute)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Warehouse database file (relative to the project root, or absolute)
    #[serde(default = "default_warehouse")]
    pub warehouse: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_warehouse() -> String {
    "data/warehouse.db".to_string()
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            warehouse: default_warehouse(),
        }
    }
}

/// Bronze ingestion section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    /// Source names; each maps to `<data_dir>/bronze/<name>.csv`
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Field delimiter of the source files
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_sources() -> Vec<String> {
    vec!["items".to_string(), "attributes".to_string()]
}

fn default_delimiter() -> char {
    ';'
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            delimiter: default_delimiter(),
        }
    }
}

/// Transformation tool section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSection {
    /// Executable of the transformation tool
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Models to run, in dependency order
    #[serde(default = "default_models")]
    pub models: Vec<String>,
}

fn default_executable() -> String {
    "dbt".to_string()
}

fn default_models() -> Vec<String> {
    [
        "bronze_items",
        "bronze_attributes",
        "silver_items",
        "silver_attributes",
        "silver_values",
        "gold_items",
        "gold_attributes",
        "gold_values",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

impl Default for TransformSection {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            models: default_models(),
        }
    }
}

/// Silver export section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilverSection {
    /// Entities exported from `silver_<entity>` tables
    #[serde(default = "default_entities")]
    pub entities: Vec<String>,
}

fn default_entities() -> Vec<String> {
    vec![
        "items".to_string(),
        "attributes".to_string(),
        "values".to_string(),
    ]
}

impl Default for SilverSection {
    fn default() -> Self {
        Self {
            entities: default_entities(),
        }
    }
}

/// One versioned gold entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldEntity {
    /// Entity name, also the table directory under the gold root
    pub name: String,
    /// Warehouse table holding the current snapshot
    pub table: String,
    /// Columns matched on merge
    pub merge_key: Vec<String>,
}

impl GoldEntity {
    /// Create an entity definition
    pub fn new(name: &str, table: &str, merge_key: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            merge_key: merge_key.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Merge key of this entity
    pub fn key(&self) -> MergeKey {
        MergeKey::new(self.merge_key.clone())
    }
}

/// Gold materialization section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldSection {
    /// Entities in materialization order
    #[serde(default = "default_gold_entities")]
    pub entities: Vec<GoldEntity>,
}

fn default_gold_entities() -> Vec<GoldEntity> {
    vec![
        GoldEntity::new("items", "gold_items", &["id"]),
        GoldEntity::new("attributes", "gold_attributes", &["id"]),
        GoldEntity::new("values", "gold_values", &["item_id", "attribute_id"]),
    ]
}

impl Default for GoldSection {
    fn default() -> Self {
        Self {
            entities: default_gold_entities(),
        }
    }
}

/// Main configuration structure
///
/// Represents the `medallion.toml` configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsSection,

    /// Bronze ingestion
    #[serde(default)]
    pub ingest: IngestSection,

    /// Transformation tool
    #[serde(default)]
    pub transform: TransformSection,

    /// Silver export
    #[serde(default)]
    pub silver: SilverSection,

    /// Gold materialization
    #[serde(default)]
    pub gold: GoldSection,
}

impl PipelineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a project directory
    ///
    /// Looks for `medallion.toml` in the project root.
    /// Falls back to defaults if not found.
    pub fn load(project_root: &Path) -> ConfigResult<Self> {
        Self::load_from(&project_root.join(CONFIG_FILENAME))
    }

    /// Load configuration from an explicit file, falling back to defaults if absent
    pub fn load_from(config_path: &Path) -> ConfigResult<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::Io(format!("Failed to read config: {}", e)))?;

            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a project directory
    pub fn save(&self, project_root: &Path) -> ConfigResult<()> {
        let config_path = project_root.join(CONFIG_FILENAME);
        let content = self.to_toml()?;

        std::fs::write(&config_path, content)
            .map_err(|e| ConfigError::Io(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.paths.data_dir = dir;
        }

        if let Ok(path) = std::env::var(ENV_WAREHOUSE_PATH) {
            self.paths.warehouse = path;
        }

        if let Ok(executable) = std::env::var(ENV_DBT_EXECUTABLE)
            && !executable.is_empty()
        {
            self.transform.executable = executable;
        }
    }

    /// Resolve the filesystem layout for a project root
    pub fn layout(&self, project_root: &Path) -> ProjectLayout {
        ProjectLayout::with_paths(
            project_root.to_path_buf(),
            &PathBuf::from(&self.paths.data_dir),
            &PathBuf::from(&self.paths.warehouse),
        )
    }

    /// Look up a gold entity by name
    pub fn gold_entity(&self, name: &str) -> Option<&GoldEntity> {
        self.gold.entities.iter().find(|e| e.name == name)
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Medallion pipeline configuration

[paths]
# Data directory holding bronze/, silver/ and gold/ (relative to the project root, or absolute)
data_dir = "data"

# Warehouse database file
warehouse = "data/warehouse.db"

[ingest]
# Source files are read from <data_dir>/bronze/<name>.csv
sources = ["items", "attributes"]
delimiter = ";"

[transform]
executable = "dbt"
models = [
    "bronze_items", "bronze_attributes",
    "silver_items", "silver_attributes", "silver_values",
    "gold_items", "gold_attributes", "gold_values",
]

[silver]
entities = ["items", "attributes", "values"]

[[gold.entities]]
name = "items"
table = "gold_items"
merge_key = ["id"]

[[gold.entities]]
name = "attributes"
table = "gold_attributes"
merge_key = ["id"]

[[gold.entities]]
name = "values"
table = "gold_values"
merge_key = ["item_id", "attribute_id"]
"#
}
