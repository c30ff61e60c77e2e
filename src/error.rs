//! Error types for mail-relay.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Work-item store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid work item id {0:?}: ids must be non-empty and free of '_', '.', and path separators")]
    InvalidId(String),

    #[error("Work item {id} already exists in {scope}")]
    Duplicate { id: String, scope: String },

    #[error("Work item {id} is already claimed in {scope}")]
    AlreadyClaimed { id: String, scope: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Mailbox provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Mailbox authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Mailbox rate limited")]
    RateLimited,

    #[error("Invalid response from mailbox: {reason}")]
    InvalidResponse { reason: String },

    #[error("Failed to compose message: {0}")]
    Compose(String),
}

/// Response generator errors.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Generator {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Authentication failed for generator {provider}")]
    AuthFailed { provider: String },

    #[error("Generator {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Job {job_id} ended with status {status}")]
    JobTerminated { job_id: String, status: String },

    #[error("Job {job_id} still running after {attempts} polls")]
    PollLimitExceeded { job_id: String, attempts: u32 },
}

/// Stage-level errors. Caught by the driver at the stage boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
