//! Persistent identifier table (`pidstore_pid`)
//!
//! Row-level primitives only; lifecycle rules live in `identifiers`.

use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use super::parse_uuid;
use crate::error::{MigrationError, Result};
use crate::model::{PersistentIdentifier, PidKey, PidStatus};

/// Load one identifier
pub async fn get<'e, E>(executor: E, key: &PidKey) -> Result<Option<PersistentIdentifier>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT pid_type, pid_value, object_uuid, status, redirect_pid_type, redirect_pid_value
        FROM pidstore_pid
        WHERE pid_type = ? AND pid_value = ?
        "#,
    )
    .bind(&key.pid_type)
    .bind(&key.pid_value)
    .fetch_optional(executor)
    .await?;

    row.map(|r| pid_from_row(&r)).transpose()
}

/// Claim `key` for `uuid` as `REGISTERED`
///
/// Succeeds when the key is new, `DELETED`, or already registered to the
/// same uuid. Returns false when a live identifier owned elsewhere blocks
/// the claim. The check and the write are one statement, so concurrent
/// claimers cannot both succeed.
pub async fn try_register<'e, E>(executor: E, key: &PidKey, uuid: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO pidstore_pid (pid_type, pid_value, object_uuid, status, created_at, updated_at)
        VALUES (?, ?, ?, 'REGISTERED', CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(pid_type, pid_value) DO UPDATE SET
            object_uuid = excluded.object_uuid,
            status = 'REGISTERED',
            redirect_pid_type = NULL,
            redirect_pid_value = NULL,
            updated_at = CURRENT_TIMESTAMP
        WHERE pidstore_pid.status = 'DELETED'
           OR (pidstore_pid.status = 'REGISTERED' AND pidstore_pid.object_uuid = excluded.object_uuid)
        "#,
    )
    .bind(&key.pid_type)
    .bind(&key.pid_value)
    .bind(uuid.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Point `key` at `target`, creating the row when missing
pub async fn upsert_redirect<'e, E>(
    executor: E,
    key: &PidKey,
    target: &PidKey,
    object_uuid: Uuid,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO pidstore_pid (
            pid_type, pid_value, object_uuid, status, redirect_pid_type, redirect_pid_value,
            created_at, updated_at
        ) VALUES (?, ?, ?, 'REDIRECTED', ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(pid_type, pid_value) DO UPDATE SET
            object_uuid = excluded.object_uuid,
            status = 'REDIRECTED',
            redirect_pid_type = excluded.redirect_pid_type,
            redirect_pid_value = excluded.redirect_pid_value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(&key.pid_type)
    .bind(&key.pid_value)
    .bind(object_uuid.to_string())
    .bind(&target.pid_type)
    .bind(&target.pid_value)
    .execute(executor)
    .await?;

    Ok(())
}

/// Mark an existing identifier `DELETED`; returns whether a row changed
pub async fn mark_deleted<'e, E>(executor: E, key: &PidKey) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE pidstore_pid
        SET status = 'DELETED', redirect_pid_type = NULL, redirect_pid_value = NULL,
            updated_at = CURRENT_TIMESTAMP
        WHERE pid_type = ? AND pid_value = ? AND status != 'DELETED'
        "#,
    )
    .bind(&key.pid_type)
    .bind(&key.pid_value)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Every identifier whose object is `uuid`
pub async fn for_object<'e, E>(executor: E, uuid: Uuid) -> Result<Vec<PersistentIdentifier>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT pid_type, pid_value, object_uuid, status, redirect_pid_type, redirect_pid_value
        FROM pidstore_pid
        WHERE object_uuid = ?
        ORDER BY pid_type, pid_value
        "#,
    )
    .bind(uuid.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(pid_from_row).collect()
}

fn pid_from_row(row: &SqliteRow) -> Result<PersistentIdentifier> {
    let object_uuid: String = row.get("object_uuid");
    let status: String = row.get("status");
    let redirect_type: Option<String> = row.get("redirect_pid_type");
    let redirect_value: Option<String> = row.get("redirect_pid_value");

    Ok(PersistentIdentifier {
        key: PidKey::new(row.get::<String, _>("pid_type"), row.get::<String, _>("pid_value")),
        object_uuid: parse_uuid(&object_uuid)?,
        status: status
            .parse::<PidStatus>()
            .map_err(|e| MigrationError::Common(hepm_common::Error::Internal(e)))?,
        redirect_target: redirect_type
            .zip(redirect_value)
            .map(|(pid_type, pid_value)| PidKey::new(pid_type, pid_value)),
    })
}
