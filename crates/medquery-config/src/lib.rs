//! Configuration for the medquery tools.
//!
//! TOML file + `MEDQUERY_` environment, layered with figment, and
//! translation into `medquery_core::QueryDefaults`. The core never reads
//! configuration itself.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use medquery_core::QueryDefaults;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "MEDQUERY_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Settings for `medquery demo`.
    #[serde(default)]
    pub demo: DemoSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// `tracing` filter used when neither `-v` nor `RUST_LOG` is given.
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            log_filter: None,
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_page_size() -> u32 {
    medquery_core::config::DEFAULT_PAGE_SIZE
}
fn default_max_page_size() -> u32 {
    medquery_core::config::DEFAULT_MAX_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DemoSettings {
    /// Resource family the demo runs against (e.g. "allergies").
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Records seeded into the in-memory backend.
    #[serde(default = "default_seed_records")]
    pub seed_records: u32,

    /// Simulated backend latency per request.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Fail every Nth backend request; 0 never fails.
    #[serde(default)]
    pub fail_every: u32,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            resource: default_resource(),
            seed_records: default_seed_records(),
            latency_ms: default_latency_ms(),
            fail_every: 0,
        }
    }
}

fn default_resource() -> String {
    "allergies".into()
}
fn default_seed_records() -> u32 {
    12
}
fn default_latency_ms() -> u64 {
    25
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `MEDQUERY_CONFIG`, else platform
/// conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("org", "medquery", "medquery").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("medquery");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is not an
/// error; defaults fill in.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MEDQUERY_").ignore(&["CONFIG"]).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build validated `QueryDefaults` from the loaded config.
pub fn to_query_defaults(cfg: &Config) -> Result<QueryDefaults, ConfigError> {
    let Defaults {
        page_size,
        max_page_size,
        ..
    } = cfg.defaults;

    if max_page_size == 0 {
        return Err(ConfigError::Validation {
            field: "defaults.max_page_size".into(),
            reason: "must be at least 1".into(),
        });
    }
    if page_size == 0 || page_size > max_page_size {
        return Err(ConfigError::Validation {
            field: "defaults.page_size".into(),
            reason: format!("expected 1..={max_page_size}, got {page_size}"),
        });
    }

    Ok(QueryDefaults {
        page_size,
        max_page_size,
    })
}
