//! Init command: write a sample configuration file

use std::io::Write;
use std::path::Path;

use crate::cli::error::CliError;
use crate::config::sample_config;

/// Write the sample configuration to `path`
///
/// An existing file is only replaced with `force`.
pub fn handle_init(path: &Path, force: bool, out: &mut dyn Write) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::validation_with_hints(
            format!("{} already exists", path.display()),
            vec!["Use --force to overwrite it.".to_string()],
        ));
    }

    std::fs::write(path, sample_config())?;
    writeln!(out, "📝 Wrote {}", path.display())?;
    Ok(())
}
