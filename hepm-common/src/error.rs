//! Common error types for the migration services

use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by storage and configuration helpers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of a stored column failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention ("database is locked" / busy)
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => is_lock_error(db_err),
            _ => false,
        }
    }
}

/// True when a sqlx error is SQLite reporting lock contention
pub fn is_lock_error(err: &sqlx::Error) -> bool {
    let message = err.to_string();
    message.contains("database is locked") || message.contains("database table is locked")
}
