//! Subcommand handlers.

pub mod config_cmd;
pub mod key_types;
pub mod run;

use std::path::PathBuf;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file selected by `--config`, or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(vtnd_config::config_path)
}

/// Load and validate the selected config file.
pub fn load_config(global: &GlobalOpts) -> Result<vtnd_config::Config, CliError> {
    let path = config_file(global);
    vtnd_config::load_config_from(&path).map_err(|e| CliError::config(&path, e))
}
