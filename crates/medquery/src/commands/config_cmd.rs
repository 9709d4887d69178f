//! Config subcommand handlers.

use medquery_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{config_path, load, output_format};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = load(global)?;
            // Reject values the engine would refuse.
            config::to_query_defaults(&cfg)?;
            let format = output_format(global, &cfg)?;
            let out = output::render_single(
                format,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("{c:#?}\n({e})")),
                |_| config_path(global).display().to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            output::print_output(&config_path(global).display().to_string(), global.quiet);
            Ok(())
        }

        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init { force } => {
            let path = config_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config_to(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("✓ Configuration written to {}", path.display());
            }
            Ok(())
        }
    }
}
