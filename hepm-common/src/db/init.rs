//! Database initialization
//!
//! Opens (creating if needed) the SQLite database shared by the migration
//! services and creates every table idempotently.

use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout per connection
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 250;

/// Default connection pool size
pub const DEFAULT_POOL_SIZE: u32 = 20;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with(db_path, DEFAULT_POOL_SIZE, DEFAULT_BUSY_TIMEOUT_MS).await
}

/// Initialize database with an explicit pool size and busy timeout
///
/// Lock contention beyond the busy timeout surfaces as "database is locked";
/// callers retry it with backoff.
pub async fn init_database_with(
    db_path: &Path,
    max_connections: u32,
    busy_timeout_ms: u64,
) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_mirror_table(pool).await?;
    create_records_tables(pool).await?;
    create_pidstore_table(pool).await?;
    create_citations_table(pool).await?;
    create_sync_pending_table(pool).await?;
    for (table, entity_column) in RELATION_TABLES {
        create_relation_table(pool, table, entity_column).await?;
    }
    Ok(())
}

/// Relation tables: (table name, entity uuid column)
pub const RELATION_TABLES: [(&str, &str); 3] = [
    ("conference_literature", "conference_uuid"),
    ("institution_literature", "institution_uuid"),
    ("experiment_literature", "experiment_uuid"),
];

async fn create_mirror_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legacy_records_mirror (
            legacy_id INTEGER PRIMARY KEY,
            raw_payload BLOB NOT NULL,
            decoded_json TEXT,
            valid INTEGER,
            collection TEXT,
            error TEXT,
            last_updated INTEGER NOT NULL,
            migrated_status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (migrated_status IN ('PENDING', 'MIGRATED', 'BROKEN')),
            status_changed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mirror_status ON legacy_records_mirror(migrated_status, legacy_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_records_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            uuid TEXT PRIMARY KEY,
            schema_type TEXT NOT NULL,
            json_body TEXT NOT NULL,
            version INTEGER NOT NULL CHECK (version >= 1),
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records_versions (
            uuid TEXT NOT NULL REFERENCES records(uuid) ON DELETE CASCADE,
            version INTEGER NOT NULL,
            json_body TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (uuid, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pidstore_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pidstore_pid (
            pid_type TEXT NOT NULL,
            pid_value TEXT NOT NULL,
            object_uuid TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('REGISTERED', 'REDIRECTED', 'DELETED')),
            redirect_pid_type TEXT,
            redirect_pid_value TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (pid_type, pid_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pid_object ON pidstore_pid(object_uuid)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_citations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records_citations (
            citer_id TEXT NOT NULL REFERENCES records(uuid) ON DELETE CASCADE,
            cited_id TEXT NOT NULL REFERENCES records(uuid) ON DELETE CASCADE,
            is_self_citation INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (citer_id, cited_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_citations_cited ON records_citations(cited_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Records written by step 2 whose relations are not synchronized yet
async fn create_sync_pending_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records_sync_pending (
            uuid TEXT PRIMARY KEY REFERENCES records(uuid) ON DELETE CASCADE,
            queued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_relation_table(pool: &SqlitePool, table: &str, entity_column: &str) -> Result<()> {
    if !table.chars().chain(entity_column.chars()).all(|c| c.is_ascii_lowercase() || c == '_') {
        return Err(Error::InvalidInput(format!("Invalid relation table name: {}", table)));
    }

    let create = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            {entity_column} TEXT NOT NULL REFERENCES records(uuid) ON DELETE CASCADE,
            literature_uuid TEXT NOT NULL REFERENCES records(uuid) ON DELETE CASCADE,
            PRIMARY KEY ({entity_column}, literature_uuid)
        )
        "#
    );
    sqlx::query(&create).execute(pool).await?;

    let index = format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_literature ON {table}(literature_uuid)"
    );
    sqlx::query(&index).execute(pool).await?;

    Ok(())
}
