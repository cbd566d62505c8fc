//! Database and migrator test utilities

use std::sync::Arc;

use anyhow::Result;
use hepm_common::events::EventBus;
use hepm_migrator::config::MigratorConfig;
use hepm_migrator::db::{mirror, pidstore, records};
use hepm_migrator::indexer::InMemoryIndex;
use hepm_migrator::model::{EntityKind, MigratedStatus, MirrorEntry, PersistentIdentifier, PidKey, TargetRecord};
use hepm_migrator::Migrator;
use sqlx::SqlitePool;
use tempfile::TempDir;

use super::fixtures::BASE_URL;

/// Create a temporary database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let pool = hepm_common::db::init_database(&temp_dir.path().join("test_hepm.db")).await?;
    Ok((temp_dir, pool))
}

/// Configuration pointing every path into `dir`
pub fn test_config(dir: &TempDir) -> MigratorConfig {
    let mut config = MigratorConfig::default();
    config.database_path = dir.path().join("test_hepm.db");
    config.records_base_url = BASE_URL.to_string();
    config.migration.lastrun_file = dir.path().join("lastrun");
    config.migration.polling_interval_ms = 50;
    config.migration.lock_wait_ms = 10_000;
    config
}

/// Migrator backed by an in-memory index
pub fn create_test_migrator(pool: &SqlitePool, config: MigratorConfig) -> (Migrator, Arc<InMemoryIndex>) {
    let index = Arc::new(InMemoryIndex::new(pool.clone()));
    let migrator = Migrator::new(pool.clone(), config, index.clone(), EventBus::new(1000));
    (migrator, index)
}

/// Record owning the control-number pid of `recid`, whatever the pid status
pub async fn record_for(pool: &SqlitePool, kind: EntityKind, recid: i64) -> Option<TargetRecord> {
    let pid = pidstore::get(pool, &PidKey::recid(kind, recid)).await.unwrap()?;
    records::get(pool, pid.object_uuid).await.unwrap()
}

pub async fn literature(pool: &SqlitePool, recid: i64) -> TargetRecord {
    record_for(pool, EntityKind::Literature, recid)
        .await
        .unwrap_or_else(|| panic!("literature {} not migrated", recid))
}

pub async fn pid(pool: &SqlitePool, pid_type: &str, pid_value: &str) -> Option<PersistentIdentifier> {
    pidstore::get(pool, &PidKey::new(pid_type, pid_value)).await.unwrap()
}

pub async fn mirror_row(pool: &SqlitePool, legacy_id: i64) -> MirrorEntry {
    mirror::get(pool, legacy_id)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("mirror row {} missing", legacy_id))
}

pub async fn mirror_status(pool: &SqlitePool, legacy_id: i64) -> MigratedStatus {
    mirror_row(pool, legacy_id).await.migrated_status
}

/// Derived aggregate of a record, 0 when absent
pub fn derived(record: &TargetRecord, field: &str) -> i64 {
    record.json_body.get(field).and_then(|v| v.as_i64()).unwrap_or(0)
}
