//! Tests for database initialization on first run and reopen

use hepm_common::db::init::{init_database, init_database_with};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("nested").join("hepm.db");
    assert!(!db_path.exists());

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing_and_keeps_rows() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("hepm.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO legacy_records_mirror (legacy_id, raw_payload, last_updated) VALUES (666, x'3c7265636f72642f3e', 0)",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM legacy_records_mirror")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let status: String =
        sqlx::query_scalar("SELECT migrated_status FROM legacy_records_mirror WHERE legacy_id = 666")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "PENDING");
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let pool = init_database_with(&temp_dir.path().join("hepm.db"), 4, 100)
        .await
        .unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let temp_dir = tempfile::tempdir().unwrap();
    let pool = init_database(&temp_dir.path().join("hepm.db")).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO records_citations (citer_id, cited_id) VALUES ('missing-a', 'missing-b')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "citation edge to unknown records must be rejected");
}
