// ── Core error types ──
//
// Failures surfaced by fetches and mutations. These are data, not control
// flow: a fetch failure lands in a subscription's error slot next to the
// stale payload, a mutation failure goes to callbacks and optionally back
// to the awaiting caller. Nothing here is fatal to the process.

use thiserror::Error;

/// Unified error type for the query engine.
#[derive(Debug, Error)]
pub enum QueryError {
    // ── Remote errors ────────────────────────────────────────────────
    /// Non-2xx response from a resource endpoint.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        /// Machine-readable error code from the response body, if any.
        code: Option<String>,
        message: String,
    },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("Mutation failed: {message}")]
    Mutation { message: String },

    // ── Runtime errors ───────────────────────────────────────────────
    #[error("No tokio runtime available to schedule fetches")]
    NoRuntime,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Build an [`QueryError::Api`] without an error code.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// HTTP-equivalent status for this failure, when one applies.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::Validation { .. } => Some(422),
            _ => None,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_permission_error(&self) -> bool {
        self.status() == Some(403)
    }

    /// Text suitable for showing to the patient on a list or detail screen.
    pub fn user_message(&self) -> String {
        match self.status() {
            Some(401) => "Your session has expired. Please log in again.".into(),
            Some(403) => "You do not have permission to perform this action.".into(),
            Some(404) => "The requested resource was not found.".into(),
            Some(422) => "Please check your input and try again.".into(),
            Some(500) => "A server error occurred. Please try again later.".into(),
            Some(503) => {
                "The service is temporarily unavailable. Please try again later.".into()
            }
            _ => {
                let text = match self {
                    Self::Api { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                if text.is_empty() {
                    "An unexpected error occurred.".into()
                } else {
                    text
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_from_variants() {
        assert_eq!(QueryError::api(401, "nope").status(), Some(401));
        let not_found = QueryError::NotFound {
            resource: "allergy".into(),
            id: "a1".into(),
        };
        assert_eq!(not_found.status(), Some(404));
        assert_eq!(QueryError::NoRuntime.status(), None);
    }

    #[test]
    fn auth_and_permission_checks() {
        assert!(QueryError::api(401, "expired").is_auth_error());
        assert!(!QueryError::api(401, "expired").is_permission_error());
        assert!(QueryError::api(403, "denied").is_permission_error());
    }

    #[test]
    fn user_message_uses_status_text() {
        assert_eq!(
            QueryError::Validation {
                message: "severity is required".into()
            }
            .user_message(),
            "Please check your input and try again."
        );
        assert_eq!(
            QueryError::api(418, "teapot").user_message(),
            "teapot"
        );
        assert_eq!(
            QueryError::api(418, "").user_message(),
            "An unexpected error occurred."
        );
        assert_eq!(
            QueryError::Fetch {
                message: "connection reset".into()
            }
            .user_message(),
            "Fetch failed: connection reset"
        );
    }
}
