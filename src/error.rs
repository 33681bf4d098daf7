//! Error types for outreach.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Contact source error: {0}")]
    Contacts(#[from] ContactError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Send log error: {0}")]
    Store(#[from] StoreError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Could not read .env file {0}")]
    DotEnv(String),
}

/// Errors from the spreadsheet contact source and its credentials.
#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error("Missing required headers: full_name, email, phone_number")]
    MissingHeaders,

    #[error("Client secrets not found at {0}")]
    SecretsNotFound(PathBuf),

    #[error("Invalid client secrets: {0}")]
    InvalidSecrets(String),

    #[error("No OAuth token at {0}; run `authorize` first")]
    TokenNotFound(PathBuf),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Service account authorization failed: {0}")]
    ServiceAccount(String),

    #[error("OAuth authorization failed: {0}")]
    Authorization(String),

    #[error("Sheets request failed: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message template errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template file {0} has no messages")]
    Empty(PathBuf),

    #[error("Template file must be an array or contain a \"messages\" array")]
    InvalidShape,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chat session transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Session not ready after {0:?}")]
    NotReady(Duration),

    #[error("Session authentication failed: {0}")]
    AuthFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Send-log persistence errors. Loading never fails; only saving does.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Report writer errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

impl From<reqwest::Error> for ContactError {
    fn from(e: reqwest::Error) -> Self {
        ContactError::Http(e.to_string())
    }
}

/// Result type alias for outreach.
pub type Result<T> = std::result::Result<T, Error>;
