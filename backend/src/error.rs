//! Error types for the family tree backend
//!
//! All errors use thiserror for structured error handling.
//! They serialize to their display string so callers never see a raw
//! low-level fault.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The resource does not exist for the caller. Also used when it exists
    /// under another owner.
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// An external program could not be started or exited non-zero.
    #[error("{program} failed: {message}")]
    Process { program: String, message: String },

    #[error("Incorrect password or corrupted file")]
    Decryption,

    #[error("Backup error: {0}")]
    Backup(String),

    /// Restore apply step failed. `snapshot` names the rollback artifact
    /// taken before anything destructive happened, when one was requested.
    #[error("Restore failed: {message}{}", snapshot_hint(.snapshot))]
    RestoreFailed {
        message: String,
        snapshot: Option<String>,
    },

    #[error("{0}")]
    Generic(String),
}

fn snapshot_hint(snapshot: &Option<String>) -> String {
    match snapshot {
        Some(name) => format!(" (pre-restore snapshot available: {})", name),
        None => String::new(),
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
