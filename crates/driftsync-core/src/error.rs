//! Error types for driftsync-core

use std::io::ErrorKind;

use thiserror::Error;

/// Result type alias using driftsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in driftsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network failure talking to the remote side (timeouts, refused connections)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote backend rejected or failed an operation
    #[error("Transport error: {0}")]
    Transport(String),

    /// Assembled content did not match the expected size or hash
    #[error("Integrity error for {path}: {reason}")]
    Integrity { path: String, reason: String },

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another pass already holds the folder
    #[error("Sync already in progress for folder {0}")]
    SyncInProgress(String),

    /// Work was stopped by a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Native filesystem watcher failure
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// How the operation queue should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff up to the operation's retry cap.
    Transient,
    /// Content verification failed; needs a manual retry.
    Integrity,
    /// Local permission / disk problem; retrying cannot help.
    LocalIo,
    /// Anything else; not retried automatically.
    Fatal,
}

impl Error {
    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) => ErrorClass::Transient,
            Self::Transport(message) if is_transient_message(message) => ErrorClass::Transient,
            Self::Io(error) => match error.kind() {
                ErrorKind::TimedOut
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock => ErrorClass::Transient,
                _ => ErrorClass::LocalIo,
            },
            Self::Integrity { .. } => ErrorClass::Integrity,
            _ => ErrorClass::Fatal,
        }
    }

    /// Whether the queue may retry this failure automatically.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

fn is_transient_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["timed out", "timeout", "connection refused", "connection reset", "unavailable"]
        .iter()
        .any(|needle| message.contains(needle))
}
