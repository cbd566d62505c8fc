//! Legacy mirror table (`legacy_records_mirror`)

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use crate::error::{MigrationError, Result};
use crate::model::{IntermediateRecord, MigratedStatus, MirrorEntry, SelectionMode};

/// Values written on ingest
#[derive(Debug, Clone)]
pub struct MirrorUpsert<'a> {
    pub legacy_id: i64,
    pub raw_payload: &'a [u8],
    pub decoded: Option<&'a IntermediateRecord>,
    pub valid: bool,
    pub collection: Option<&'a str>,
    pub error: Option<&'a str>,
    pub source_timestamp: DateTime<Utc>,
}

/// Insert or overwrite a mirror row
///
/// A row whose stored timestamp is newer than the incoming one is left
/// untouched. Returns whether the row was written. A written row goes back
/// to `PENDING` so the next default-mode run migrates the new content.
pub async fn upsert<'e, E>(executor: E, entry: &MirrorUpsert<'_>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let decoded_json = entry.decoded.map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO legacy_records_mirror (
            legacy_id, raw_payload, decoded_json, valid, collection, error,
            last_updated, migrated_status, status_changed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', CURRENT_TIMESTAMP)
        ON CONFLICT(legacy_id) DO UPDATE SET
            raw_payload = excluded.raw_payload,
            decoded_json = excluded.decoded_json,
            valid = excluded.valid,
            collection = excluded.collection,
            error = excluded.error,
            last_updated = excluded.last_updated,
            migrated_status = 'PENDING',
            status_changed_at = CURRENT_TIMESTAMP
        WHERE excluded.last_updated >= legacy_records_mirror.last_updated
        "#,
    )
    .bind(entry.legacy_id)
    .bind(entry.raw_payload)
    .bind(decoded_json)
    .bind(entry.valid)
    .bind(entry.collection)
    .bind(entry.error)
    .bind(entry.source_timestamp.timestamp_millis())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load one mirror row
pub async fn get<'e, E>(executor: E, legacy_id: i64) -> Result<Option<MirrorEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT legacy_id, raw_payload, decoded_json, valid, collection, error,
               last_updated, migrated_status
        FROM legacy_records_mirror
        WHERE legacy_id = ?
        "#,
    )
    .bind(legacy_id)
    .fetch_optional(executor)
    .await?;

    row.map(|r| entry_from_row(&r)).transpose()
}

/// Rows eligible for step 2, ordered by `legacy_id`
pub async fn select_for_migration<'e, E>(
    executor: E,
    mode: SelectionMode,
    date_from: Option<DateTime<Utc>>,
) -> Result<Vec<MirrorEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let status_filter = match mode {
        SelectionMode::Default => Some(MigratedStatus::Pending.as_str()),
        SelectionMode::All => None,
        SelectionMode::Broken => Some(MigratedStatus::Broken.as_str()),
    };

    let rows = sqlx::query(
        r#"
        SELECT legacy_id, raw_payload, decoded_json, valid, collection, error,
               last_updated, migrated_status
        FROM legacy_records_mirror
        WHERE (? IS NULL OR migrated_status = ?)
          AND (? IS NULL OR last_updated >= ?)
        ORDER BY legacy_id ASC
        "#,
    )
    .bind(status_filter)
    .bind(status_filter)
    .bind(date_from.map(|d| d.timestamp_millis()))
    .bind(date_from.map(|d| d.timestamp_millis()))
    .fetch_all(executor)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Mark a row `MIGRATED` and clear its error
pub async fn mark_migrated<'e, E>(executor: E, legacy_id: i64) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE legacy_records_mirror
        SET migrated_status = 'MIGRATED', error = NULL, status_changed_at = CURRENT_TIMESTAMP
        WHERE legacy_id = ?
        "#,
    )
    .bind(legacy_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Mark a row `BROKEN` with the captured error
pub async fn mark_broken<'e, E>(executor: E, legacy_id: i64, reason: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE legacy_records_mirror
        SET migrated_status = 'BROKEN', error = ?, status_changed_at = CURRENT_TIMESTAMP
        WHERE legacy_id = ?
        "#,
    )
    .bind(reason)
    .bind(legacy_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Broken rows with their errors, ordered by `legacy_id`
pub async fn list_broken<'e, E>(executor: E) -> Result<Vec<(i64, Option<String>)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT legacy_id, error FROM legacy_records_mirror WHERE migrated_status = 'BROKEN' ORDER BY legacy_id",
    )
    .fetch_all(executor)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("legacy_id"), row.get("error")))
        .collect())
}

/// Row counts per status
pub async fn count_by_status<'e, E>(executor: E) -> Result<Vec<(MigratedStatus, i64)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT migrated_status, COUNT(*) AS n FROM legacy_records_mirror GROUP BY migrated_status ORDER BY migrated_status",
    )
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            let status: String = row.get("migrated_status");
            let status = status
                .parse::<MigratedStatus>()
                .map_err(|e| MigrationError::Common(hepm_common::Error::Internal(e)))?;
            Ok((status, row.get("n")))
        })
        .collect()
}

fn entry_from_row(row: &SqliteRow) -> Result<MirrorEntry> {
    let decoded_json: Option<String> = row.get("decoded_json");
    let decoded = match decoded_json {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    let status: String = row.get("migrated_status");
    let last_updated: i64 = row.get("last_updated");

    Ok(MirrorEntry {
        legacy_id: row.get("legacy_id"),
        raw_payload: row.get("raw_payload"),
        decoded,
        valid: row.get("valid"),
        collection: row.get("collection"),
        error: row.get("error"),
        last_updated: Utc
            .timestamp_millis_opt(last_updated)
            .single()
            .unwrap_or_default(),
        migrated_status: status
            .parse()
            .map_err(|e: String| MigrationError::Common(hepm_common::Error::Internal(e)))?,
    })
}
