//! CLI-side configuration glue: `--config` / `--output` overrides on top of
//! `medquery-config`.

use std::path::PathBuf;

use clap::ValueEnum;

use medquery_config::{self as config, Config};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

/// Config file in effect: `--config` (or `MEDQUERY_CONFIG`), else the
/// platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(config::load_config_from(&config_path(global))?)
}

/// `--output` if given, else the config default, else table.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> Result<OutputFormat, CliError> {
    if let Some(format) = global.output {
        return Ok(format);
    }
    OutputFormat::from_str(&cfg.defaults.output, true).map_err(|reason| CliError::Validation {
        field: "defaults.output".into(),
        reason,
    })
}
