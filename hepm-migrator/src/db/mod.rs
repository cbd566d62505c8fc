//! Database access
//!
//! Free async functions over SQLite, one module per table group. Functions
//! that issue a single statement accept any executor (pool, connection or
//! transaction); multi-statement operations take `&mut SqliteConnection` so
//! callers decide the transaction boundary.

pub mod mirror;
pub mod pidstore;
pub mod records;
pub mod relations;

use uuid::Uuid;

use crate::error::{MigrationError, Result};

/// Parse a uuid stored as TEXT
pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| MigrationError::Common(hepm_common::Error::Internal(format!(
            "invalid uuid in database {:?}: {}",
            value, e
        ))))
}
