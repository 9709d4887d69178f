//! Command dispatch: bridges CLI args -> core engine -> output formatting.

pub mod config_cmd;
pub mod demo;
pub mod keys;

use medquery_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command that runs against a loaded configuration.
pub async fn dispatch(cmd: Command, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Demo(args) => demo::handle(args, cfg, global).await,
        Command::Keys(args) => keys::handle(&args, cfg, global),
        // Config and Completions are handled before the config is loaded
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
