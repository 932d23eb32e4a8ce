//! Core error types for practimer-core.
//!
//! The state machine itself cannot fail on valid input; every failure mode
//! here originates at a boundary (configuration validation, the persistence
//! collaborator, the audio-resume side effect) and is isolated so it never
//! corrupts session state or stalls the countdown.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for practimer-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Audio-context resume failed (non-fatal, surfaced as a warning)
    #[error("Audio resume error: {0}")]
    AudioResume(#[from] AudioResumeError),

    /// The session service task is gone (channel closed)
    #[error("Session service unavailable")]
    ServiceClosed,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
///
/// Rejected at the configuration boundary; invalid values never reach the
/// state machine.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Database-specific errors.
///
/// These stay inside the persistence collaborator; the session service logs
/// them and moves on.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Audio-context resume failure.
///
/// Reported to the caller as a warning from `start()`; the countdown starts
/// regardless.
#[derive(Error, Debug, Clone)]
#[error("Failed to resume audio context: {0}")]
pub struct AudioResumeError(pub String);

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
