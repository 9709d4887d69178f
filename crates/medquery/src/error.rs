//! CLI error types with miette diagnostics.
//!
//! Maps `QueryError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use medquery_config::ConfigError;
use medquery_core::QueryError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const UNAVAILABLE: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Records ──────────────────────────────────────────────────────
    #[error("{resource} '{id}' not found")]
    #[diagnostic(
        code(medquery::not_found),
        help("Run: medquery keys {resource} to see how its records are addressed")
    )]
    NotFound { resource: String, id: String },

    #[error("Request rejected ({status}): {message}")]
    #[diagnostic(code(medquery::api_error), help("{hint}"))]
    Api {
        status: u16,
        message: String,
        hint: String,
    },

    #[error(transparent)]
    #[diagnostic(code(medquery::query))]
    Query(QueryError),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(medquery::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists")]
    #[diagnostic(
        code(medquery::config_exists),
        help("Use --force to overwrite it.\nPath: {path}")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(medquery::config),
        help("Check the config file (medquery config path) and MEDQUERY_* variables.")
    )]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(medquery::render))]
    Render(String),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ConfigExists { .. } => exit_code::USAGE,
            Self::Api { status, .. } => match status {
                401 => exit_code::AUTH,
                403 => exit_code::PERMISSION,
                404 => exit_code::NOT_FOUND,
                422 => exit_code::USAGE,
                503 => exit_code::UNAVAILABLE,
                _ => exit_code::GENERAL,
            },
            _ => exit_code::GENERAL,
        }
    }
}

// ── QueryError → CliError mapping ────────────────────────────────────

impl From<QueryError> for CliError {
    fn from(err: QueryError) -> Self {
        let hint = err.user_message();
        match err {
            QueryError::NotFound { resource, id } => Self::NotFound { resource, id },
            QueryError::Validation { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            QueryError::Api {
                status, message, ..
            } => Self::Api {
                status,
                message,
                hint,
            },
            other => Self::Query(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_keep_status_and_hint() {
        let err = CliError::from(QueryError::api(403, "not your record"));
        assert_eq!(err.exit_code(), exit_code::PERMISSION);
        assert!(matches!(
            err,
            CliError::Api { ref hint, .. } if hint == "You do not have permission to perform this action."
        ));
    }

    #[test]
    fn config_validation_becomes_usage_error() {
        let err = CliError::from(ConfigError::Validation {
            field: "defaults.page_size".into(),
            reason: "must be at least 1".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn not_found_exit_code() {
        let err = CliError::from(QueryError::NotFound {
            resource: "allergies".into(),
            id: "a9".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert_eq!(err.to_string(), "allergies 'a9' not found");
    }
}
