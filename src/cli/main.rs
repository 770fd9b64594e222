//! CLI binary entry point for medallion

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use medallion_lake::cli::CliError;
use medallion_lake::cli::commands::gold::{
    DEFAULT_LIMIT, ShowArgs, handle_diff, handle_info, handle_list_tables, handle_show,
    handle_versions,
};
use medallion_lake::cli::commands::init::handle_init;
use medallion_lake::cli::commands::pipeline::{Stage, handle_backfill, handle_run, handle_stage};
use medallion_lake::config::{CONFIG_FILENAME, PipelineConfig};
use medallion_lake::partition::PartitionKey;
use medallion_lake::pipeline::Pipeline;
use medallion_lake::query::GoldQuery;
use medallion_lake::table::DeltaTableStore;
use medallion_lake::transform::DbtRunner;
use medallion_lake::warehouse::DuckDbWarehouse;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

#[derive(Parser)]
#[command(name = "medallion")]
#[command(about = "Medallion pipeline and gold layer query CLI")]
#[command(version)]
struct Cli {
    /// Project root holding medallion.toml and the data directory
    #[arg(long, global = true, default_value = ".")]
    project_root: PathBuf,

    /// Configuration file (defaults to <project-root>/medallion.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Project(ProjectCommand),
    /// Write a sample medallion.toml to the project root
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Commands that run against a configured project
#[derive(Subcommand)]
enum ProjectCommand {
    /// List the gold tables
    ListTables,
    /// Show the first rows of a gold table
    Show {
        /// Table name
        table: String,
        /// Number of rows to show
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
        /// Partition date (YYYY-MM-DD) to time travel to
        #[arg(short, long)]
        partition: Option<String>,
    },
    /// Show row count, versions, partition dates and schema of a gold table
    Info {
        /// Table name
        table: String,
    },
    /// List the versions of a gold table
    Versions {
        /// Table name
        table: String,
    },
    /// Summarize the changes of the latest version of the values table
    Diff,
    /// Run the full pipeline for one or more partition dates
    Run {
        /// Partition dates, processed in order
        #[arg(required = true)]
        dates: Vec<String>,
        /// Print the run reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the full pipeline for every day of an inclusive date range
    Backfill {
        /// First partition date (YYYY-MM-DD)
        #[arg(long)]
        from: String,
        /// Last partition date (YYYY-MM-DD)
        #[arg(long)]
        to: String,
        /// Print the run reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stage the configured source files for a partition
    Ingest { date: String },
    /// Load a partition's staged files into the bronze tables
    Load { date: String },
    /// Run the transformation models for a partition
    Transform { date: String },
    /// Materialize the gold tables for a partition
    Materialize { date: String },
    /// Export the silver tables for a partition
    ExportSilver { date: String },
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let root = cli.project_root;

    match cli.command {
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(|| root.join(CONFIG_FILENAME));
            handle_init(&path, force, out)
        }
        Commands::Project(command) => execute_project(&root, cli.config.as_deref(), command, out),
    }
}

fn execute_project(
    root: &Path,
    config_path: Option<&Path>,
    command: ProjectCommand,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let config = match config_path {
        Some(path) => PipelineConfig::load_from(path)?,
        None => PipelineConfig::load(root)?,
    };
    let layout = config.layout(root);
    let store = DeltaTableStore::new().map_err(|e| CliError::IoError(e.to_string()))?;
    let query = GoldQuery::new(&store, layout.gold_root());

    let warehouse = DuckDbWarehouse::new(layout.warehouse_path());
    let runner = DbtRunner::new(&config.transform.executable, root);
    let pipeline = Pipeline::new(&config, &layout, &warehouse, &runner, &store);

    match command {
        ProjectCommand::ListTables => handle_list_tables(&query, out),
        ProjectCommand::Show {
            table,
            limit,
            partition,
        } => {
            let args = ShowArgs {
                table,
                limit,
                partition,
            };
            handle_show(&query, &args, out)
        }
        ProjectCommand::Info { table } => handle_info(&query, &table, out),
        ProjectCommand::Versions { table } => handle_versions(&query, &table, out),
        ProjectCommand::Diff => handle_diff(&query, out),
        ProjectCommand::Run { dates, json } => {
            let keys: Vec<PartitionKey> = dates.into_iter().map(PartitionKey::new).collect();
            handle_run(&pipeline, &keys, json, out)
        }
        ProjectCommand::Backfill { from, to, json } => {
            handle_backfill(&pipeline, &from, &to, json, out)
        }
        ProjectCommand::Ingest { date } => {
            handle_stage(&pipeline, Stage::Ingest, &PartitionKey::new(date), out)
        }
        ProjectCommand::Load { date } => {
            handle_stage(&pipeline, Stage::Load, &PartitionKey::new(date), out)
        }
        ProjectCommand::Transform { date } => {
            handle_stage(&pipeline, Stage::Transform, &PartitionKey::new(date), out)
        }
        ProjectCommand::Materialize { date } => {
            handle_stage(&pipeline, Stage::Materialize, &PartitionKey::new(date), out)
        }
        ProjectCommand::ExportSilver { date } => {
            handle_stage(&pipeline, Stage::ExportSilver, &PartitionKey::new(date), out)
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut stdout = std::io::stdout();
    if let Err(e) = execute(cli, &mut stdout) {
        println!("{}", e.render());
        std::process::exit(e.exit_code());
    }
}
