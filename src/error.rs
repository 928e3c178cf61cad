//! Crate-wide error types.
//!
//! [`Error`] is the variant surfaced by core operations (store, node clients,
//! caches, reconciliation). HTTP handlers translate it to a status code;
//! background jobs log it and move on to the next tick.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream node unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("transient error, retry: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("connection pool error: {0}")]
    Connection(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Whether this error represents a node-sync failure that should not
    /// fail the caller's request — the reconciler will converge on the next tick.
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable(_) | Error::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Field-level validation errors, aggregated into a flat `{field: message}`
/// map by the HTTP layer for a 422 response body.
#[derive(Debug, Default, Clone)]
pub struct ValidationErrors {
    pub fields: Vec<(String, String)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.push((field.into(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_result<T>(self, value: T) -> std::result::Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errs: ValidationErrors) -> Self {
        let joined = errs
            .fields
            .into_iter()
            .map(|(field, msg)| format!("{field}: {msg}"))
            .collect::<Vec<_>>()
            .join("; ");
        Error::Validation(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_unavailable_is_upstream() {
        let err = Error::UpstreamUnavailable("node 1 timed out".into());
        assert!(err.is_upstream());
    }

    #[test]
    fn validation_is_not_upstream() {
        let err = Error::Validation("bad username".into());
        assert!(!err.is_upstream());
    }

    #[test]
    fn validation_errors_aggregate_into_error() {
        let mut errs = ValidationErrors::new();
        errs.push("username", "too short");
        errs.push("limit_usage", "must be >= 0");
        let err: Error = errs.into();
        let msg = err.to_string();
        assert!(msg.contains("username"));
        assert!(msg.contains("limit_usage"));
    }

    #[test]
    fn empty_validation_errors_into_result_is_ok() {
        let errs = ValidationErrors::new();
        assert!(errs.into_result(42).is_ok());
    }
}
