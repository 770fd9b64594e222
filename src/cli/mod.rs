//! Command-line surface: gold queries and pipeline entry points

pub mod commands;
pub mod error;

pub use error::CliError;
