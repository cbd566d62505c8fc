//! Error types for hepm-migrator
//!
//! `MigrationError` is the per-record taxonomy used by the pipeline;
//! `ApiError` maps failures onto JSON responses for the health server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Migration error taxonomy
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Malformed legacy fragment (recorded as `valid = false`, never fatal)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Schema-level inconsistency found while converting a record
    #[error("Transform error: {0}")]
    Transform(String),

    /// Identifier already owned by another live record
    #[error("Identifier {pid_type}:{pid_value} already assigned to {existing_uuid}")]
    Conflict {
        pid_type: String,
        pid_value: String,
        existing_uuid: Uuid,
    },

    /// Identifier does not resolve to a live record
    #[error("Identifier {pid_type}:{pid_value} not found")]
    NotFound { pid_type: String, pid_value: String },

    /// External collaborator unavailable after retries
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// Article already present in the record store
    #[error("Article {0} already exists")]
    ExistingArticle(String),

    /// Identifier is neither a DOI nor an arXiv id
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// Upstream payload could not be parsed
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// hepm-common error
    #[error("Common error: {0}")]
    Common(#[from] hepm_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrationError {
    /// Storage-unavailable errors abort the running batch
    ///
    /// Everything else is scoped to the record being migrated and marks its
    /// mirror row `BROKEN`.
    pub fn is_batch_fatal(&self) -> bool {
        match self {
            MigrationError::Database(err) => is_storage_unavailable(err),
            MigrationError::Common(hepm_common::Error::Database(err)) => {
                is_storage_unavailable(err)
            }
            MigrationError::Common(hepm_common::Error::Io(_)) => true,
            MigrationError::Io(_) => true,
            _ => false,
        }
    }

    /// True for SQLite lock contention, retried by `retry_on_lock`
    pub fn is_lock_contention(&self) -> bool {
        match self {
            MigrationError::Database(err) => hepm_common::error::is_lock_error(err),
            MigrationError::Common(err) => err.is_lock_contention(),
            _ => false,
        }
    }

    pub fn not_found(pid_type: &str, pid_value: &str) -> Self {
        MigrationError::NotFound {
            pid_type: pid_type.to_string(),
            pid_value: pid_value.to_string(),
        }
    }
}

fn is_storage_unavailable(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
    )
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Migration error
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Migration(MigrationError::NotFound { pid_type, pid_value }) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{}:{}", pid_type, pid_value),
            ),
            ApiError::Migration(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "MIGRATION_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;
