//! Config file resolution for the CLI.

use std::path::{Path, PathBuf};

use streamguard_config::{Config, RuntimeConfig, config_path, load_config};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// `--config` / `STREAMGUARD_CONFIG`, else the platform default.
pub fn resolve_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

pub fn load(path: &Path) -> Result<Config, CliError> {
    load_config(Some(path)).map_err(CliError::config(path))
}

pub fn load_runtime(path: &Path) -> Result<RuntimeConfig, CliError> {
    load(path)?.to_runtime().map_err(CliError::config(path))
}
