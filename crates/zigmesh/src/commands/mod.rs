//! Command handlers, one module per top-level subcommand.

pub mod channel;
pub mod config_cmd;
pub mod snapshot;

use std::path::PathBuf;

use zigmesh_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Path of the config file in effect: `--config`, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(zigmesh_config::config_path)
}

/// Load the config in effect (defaults when the file is missing).
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(zigmesh_config::load_config_from(&config_file(global))?)
}
