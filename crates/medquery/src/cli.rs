//! Clap derive structures for the `medquery` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use medquery_core::ResourceKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// medquery -- reactive query cache and invalidation engine for patient records
#[derive(Debug, Parser)]
#[command(
    name = "medquery",
    version,
    about = "Exercise the patient-record query cache from the command line",
    long_about = "Runs list and detail subscriptions against an in-memory record\n\
        backend, performs writes that invalidate resource families, and\n\
        prints the query keys each resource uses.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "MEDQUERY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format (defaults to the config file's `defaults.output`)
    #[arg(long, short = 'o', env = "MEDQUERY_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run list/detail subscriptions through a series of writes
    Demo(DemoArgs),

    /// Show the query keys and invalidation patterns of a resource
    #[command(alias = "k")]
    Keys(KeysArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Demo ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Resource family to exercise (e.g. allergies, vital-signs)
    #[arg(long, short = 'r')]
    pub resource: Option<ResourceKind>,

    /// Number of writes to perform (cycles create, update, delete)
    #[arg(long, short = 'w', default_value = "3")]
    pub writes: u32,

    /// Simulated backend latency in milliseconds
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Fail every Nth backend request (0 = never)
    #[arg(long)]
    pub fail_every: Option<u32>,

    /// Records seeded into the backend
    #[arg(long)]
    pub seed: Option<u32>,

    /// Page size for the list subscription
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Search term applied to the list after the writes
    #[arg(long)]
    pub search: Option<String>,
}

// ── Keys ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct KeysArgs {
    /// Resource family (e.g. allergies, family-history, vital-signs)
    pub resource: ResourceKind,

    /// Record id for the detail key
    #[arg(long)]
    pub id: Option<String>,

    /// List page
    #[arg(long, default_value = "1")]
    pub page: u32,

    /// List page size (defaults to the configured page size)
    #[arg(long)]
    pub page_size: Option<u32>,

    /// List search term
    #[arg(long)]
    pub search: Option<String>,

    /// List filter as field=value (repeatable)
    #[arg(long = "filter", value_name = "FIELD=VALUE")]
    pub filters: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (file + environment)
    Show,

    /// Print the config file path
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
