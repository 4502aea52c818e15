//! Core error types for deepfocus-core.
//!
//! Errors are split by concern: timer contract violations, storage backend
//! failures, XP domain errors, configuration problems and record decoding.
//! [`CoreError`] wraps all of them for callers that don't care which.

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::TimerState;

/// Core error type for deepfocus-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Timer contract violations
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// XP formula errors
    #[error("XP error: {0}")]
    Xp(#[from] XpError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persisted record could not be decoded
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors surfaced to the code driving a session timer.
///
/// These indicate a bug in the calling layer and are reported through the
/// timer's `on_error` callback as well as returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// A lifecycle call that the state machine does not allow.
    #[error("Illegal transition: cannot {action} while {from}")]
    IllegalTransition {
        action: &'static str,
        from: TimerState,
    },

    /// Unsupported duration (only 60, 90 and 120 minutes are valid).
    #[error("Unsupported session duration: {0} minutes")]
    UnsupportedDuration(u32),

    /// Invalid construction parameter.
    #[error("Invalid timer configuration for '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    /// The timer has been destroyed and no longer accepts commands.
    #[error("Timer for session {0} has been destroyed")]
    Destroyed(String),
}

/// Key-value storage failures.
///
/// The timer never propagates these; they are logged and the countdown keeps
/// running in memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Storage is disabled or read-only.
    #[error("Storage is unavailable")]
    Unavailable,

    /// Quota exceeded while writing.
    #[error("Storage quota exceeded writing '{key}'")]
    QuotaExceeded { key: String },

    /// Backend-specific failure.
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// XP formula errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XpError {
    /// Project cost or benefit outside `[1, 10]`.
    #[error("Invalid value for '{field}': {value} (expected 1..=10)")]
    OutOfRange { field: &'static str, value: u32 },

    /// Unknown willpower level name.
    #[error("Unknown willpower level: {0}")]
    UnknownWillpower(String),
}

/// Configuration-specific errors.
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
}

/// Reasons a persisted timer record is rejected.
///
/// Any of these makes the stored entry count as absent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Malformed timer record: {0}")]
    Malformed(String),

    #[error("Unsupported timer record version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Timer record belongs to session '{found}', expected '{expected}'")]
    SessionMismatch { found: String, expected: String },

    #[error("Invalid timer record field '{field}': {message}")]
    InvalidField { field: &'static str, message: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => match e.code {
                rusqlite::ErrorCode::DiskFull => StorageError::QuotaExceeded {
                    key: String::new(),
                },
                rusqlite::ErrorCode::ReadOnly | rusqlite::ErrorCode::CannotOpen => {
                    StorageError::Unavailable
                }
                _ => StorageError::Backend(err.to_string()),
            },
            _ => StorageError::Backend(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.into())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
