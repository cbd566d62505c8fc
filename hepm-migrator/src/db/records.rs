//! Record store (`records`, `records_versions`)
//!
//! Every content change creates a new version row so the relation
//! synchronizer can diff against the previous persisted version. Derived
//! aggregates are written in place without a version bump.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::parse_uuid;
use crate::error::{MigrationError, Result};
use crate::model::{EntityKind, TargetRecord};

/// Derived aggregate fields owned by the relation synchronizer
pub const DERIVED_FIELDS: [&str; 3] = ["citation_count", "number_of_papers", "number_of_contributions"];

/// Insert a new record at version 1
pub async fn create(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    body: Value,
    deleted: bool,
) -> Result<TargetRecord> {
    insert(conn, Uuid::new_v4(), kind, body, deleted).await
}

/// Insert a new record with a caller-chosen uuid
pub async fn insert(
    conn: &mut SqliteConnection,
    uuid: Uuid,
    kind: EntityKind,
    body: Value,
    deleted: bool,
) -> Result<TargetRecord> {
    let body_text = serde_json::to_string(&body)?;

    sqlx::query(
        r#"
        INSERT INTO records (uuid, schema_type, json_body, version, deleted, created_at, updated_at)
        VALUES (?, ?, ?, 1, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(uuid.to_string())
    .bind(kind.as_str())
    .bind(&body_text)
    .bind(deleted)
    .execute(&mut *conn)
    .await?;

    insert_version(conn, uuid, 1, &body_text, deleted).await?;

    Ok(TargetRecord {
        uuid,
        kind,
        json_body: body,
        version: 1,
        deleted,
    })
}

/// Update a record's content
///
/// Returns the current record and whether a new version was written. An
/// update whose body and deleted flag equal the current ones is a no-op.
pub async fn update(
    conn: &mut SqliteConnection,
    uuid: Uuid,
    body: Value,
    deleted: bool,
) -> Result<(TargetRecord, bool)> {
    let current = get(&mut *conn, uuid)
        .await?
        .ok_or_else(|| MigrationError::Common(hepm_common::Error::NotFound(format!("record {}", uuid))))?;

    if current.json_body == body && current.deleted == deleted {
        return Ok((current, false));
    }

    let version = current.version + 1;
    let body_text = serde_json::to_string(&body)?;

    sqlx::query(
        r#"
        UPDATE records
        SET json_body = ?, version = ?, deleted = ?, updated_at = CURRENT_TIMESTAMP
        WHERE uuid = ?
        "#,
    )
    .bind(&body_text)
    .bind(version)
    .bind(deleted)
    .bind(uuid.to_string())
    .execute(&mut *conn)
    .await?;

    insert_version(conn, uuid, version, &body_text, deleted).await?;

    Ok((
        TargetRecord {
            uuid,
            kind: current.kind,
            json_body: body,
            version,
            deleted,
        },
        true,
    ))
}

/// Mark a record deleted (new version with `deleted = true` in body and row)
pub async fn mark_deleted(conn: &mut SqliteConnection, uuid: Uuid) -> Result<Option<TargetRecord>> {
    let Some(current) = get(&mut *conn, uuid).await? else {
        return Ok(None);
    };
    let mut body = current.json_body.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("deleted".to_string(), Value::Bool(true));
    }
    let (record, _) = update(conn, uuid, body, true).await?;
    Ok(Some(record))
}

async fn insert_version(
    conn: &mut SqliteConnection,
    uuid: Uuid,
    version: i64,
    body_text: &str,
    deleted: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO records_versions (uuid, version, json_body, deleted, created_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(uuid.to_string())
    .bind(version)
    .bind(body_text)
    .bind(deleted)
    .execute(conn)
    .await?;

    Ok(())
}

/// Current version of a record
pub async fn get<'e, E>(executor: E, uuid: Uuid) -> Result<Option<TargetRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT uuid, schema_type, json_body, version, deleted FROM records WHERE uuid = ?",
    )
    .bind(uuid.to_string())
    .fetch_optional(executor)
    .await?;

    row.map(|r| record_from_row(&r)).transpose()
}

/// A specific persisted version of a record
pub async fn get_version<'e, E>(executor: E, uuid: Uuid, version: i64) -> Result<Option<TargetRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT v.uuid, r.schema_type, v.json_body, v.version, v.deleted
        FROM records_versions v
        JOIN records r ON r.uuid = v.uuid
        WHERE v.uuid = ? AND v.version = ?
        "#,
    )
    .bind(uuid.to_string())
    .bind(version)
    .fetch_optional(executor)
    .await?;

    row.map(|r| record_from_row(&r)).transpose()
}

/// Version preceding `record` (None for a first version)
pub async fn previous_version<'e, E>(executor: E, record: &TargetRecord) -> Result<Option<TargetRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if record.version <= 1 {
        return Ok(None);
    }
    get_version(executor, record.uuid, record.version - 1).await
}

/// Write a derived aggregate in place on the current version
pub async fn set_derived_field(
    conn: &mut SqliteConnection,
    uuid: Uuid,
    field: &str,
    value: i64,
) -> Result<()> {
    if !DERIVED_FIELDS.contains(&field) {
        return Err(MigrationError::Common(hepm_common::Error::InvalidInput(format!(
            "{} is not a derived field",
            field
        ))));
    }
    let path = format!("$.{}", field);

    sqlx::query("UPDATE records SET json_body = json_set(json_body, ?, ?) WHERE uuid = ?")
        .bind(&path)
        .bind(value)
        .bind(uuid.to_string())
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        UPDATE records_versions
        SET json_body = json_set(json_body, ?, ?)
        WHERE uuid = ? AND version = (SELECT version FROM records WHERE uuid = ?)
        "#,
    )
    .bind(&path)
    .bind(value)
    .bind(uuid.to_string())
    .bind(uuid.to_string())
    .execute(conn)
    .await?;

    Ok(())
}

/// Literature records whose body mentions `needle` verbatim
///
/// Candidates only: callers confirm by extracting links from the body.
pub async fn literature_mentioning<'e, E>(executor: E, needle: &str) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT uuid FROM records WHERE schema_type = 'literature' AND instr(json_body, ?) > 0 ORDER BY created_at, uuid",
    )
    .bind(needle)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("uuid")))
        .collect()
}

/// Every record uuid, oldest first
pub async fn all_uuids<'e, E>(executor: E) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT uuid FROM records ORDER BY created_at, uuid")
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("uuid")))
        .collect()
}

/// Queue `uuid` for relation synchronization
pub async fn queue_sync<'e, E>(executor: E, uuid: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO records_sync_pending (uuid) VALUES (?) ON CONFLICT(uuid) DO NOTHING")
        .bind(uuid.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Drop `uuid` from the synchronization queue
pub async fn unqueue_sync<'e, E>(executor: E, uuid: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM records_sync_pending WHERE uuid = ?")
        .bind(uuid.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Records still waiting for relation synchronization, oldest first
pub async fn pending_sync<'e, E>(executor: E) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT uuid FROM records_sync_pending ORDER BY queued_at, uuid")
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("uuid")))
        .collect()
}

fn record_from_row(row: &SqliteRow) -> Result<TargetRecord> {
    let uuid: String = row.get("uuid");
    let schema_type: String = row.get("schema_type");
    let body: String = row.get("json_body");

    Ok(TargetRecord {
        uuid: parse_uuid(&uuid)?,
        kind: schema_type
            .parse()
            .map_err(|e: String| MigrationError::Common(hepm_common::Error::Internal(e)))?,
        json_body: serde_json::from_str(&body)?,
        version: row.get("version"),
        deleted: row.get("deleted"),
    })
}

/// Copy derived aggregates from `current` into a freshly transformed body
pub fn carry_derived_fields(current: &Value, body: &mut Value) {
    let Some(target) = body.as_object_mut() else {
        return;
    };
    for field in DERIVED_FIELDS {
        if let Some(value) = current.get(field) {
            target.insert(field.to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = hepm_common::db::init_database(&dir.path().join("records.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_create_update_and_previous_version() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let record = create(&mut conn, EntityKind::Literature, json!({"titles": [{"title": "A"}]}), false)
            .await
            .unwrap();
        assert_eq!(record.version, 1);
        assert!(previous_version(&mut *conn, &record).await.unwrap().is_none());

        let (updated, changed) = update(&mut conn, record.uuid, json!({"titles": [{"title": "B"}]}), false)
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(updated.version, 2);

        let previous = previous_version(&mut *conn, &updated).await.unwrap().unwrap();
        assert_eq!(previous.version, 1);
        assert_eq!(previous.json_body["titles"][0]["title"], "A");
    }

    #[tokio::test]
    async fn test_unchanged_update_creates_no_version() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let body = json!({"control_number": 1});
        let record = create(&mut conn, EntityKind::Author, body.clone(), false).await.unwrap();
        let (same, changed) = update(&mut conn, record.uuid, body, false).await.unwrap();
        assert!(!changed);
        assert_eq!(same.version, 1);
    }

    #[tokio::test]
    async fn test_derived_field_written_in_place() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let record = create(&mut conn, EntityKind::Literature, json!({"control_number": 666}), false)
            .await
            .unwrap();
        set_derived_field(&mut conn, record.uuid, "citation_count", 3).await.unwrap();

        let current = get(&pool, record.uuid).await.unwrap().unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.json_body["citation_count"], 3);

        let stored = get_version(&pool, record.uuid, 1).await.unwrap().unwrap();
        assert_eq!(stored.json_body["citation_count"], 3);

        assert!(set_derived_field(&mut conn, record.uuid, "titles", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_deleted_bumps_version() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let record = create(&mut conn, EntityKind::Literature, json!({"control_number": 1}), false)
            .await
            .unwrap();
        let deleted = mark_deleted(&mut conn, record.uuid).await.unwrap().unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.version, 2);
        assert_eq!(deleted.json_body["deleted"], true);
        assert!(mark_deleted(&mut conn, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_queue() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let a = create(&mut conn, EntityKind::Literature, json!({}), false).await.unwrap();
        let b = create(&mut conn, EntityKind::Literature, json!({}), false).await.unwrap();
        queue_sync(&mut *conn, a.uuid).await.unwrap();
        queue_sync(&mut *conn, b.uuid).await.unwrap();
        queue_sync(&mut *conn, a.uuid).await.unwrap();

        let mut pending = pending_sync(&mut *conn).await.unwrap();
        pending.sort();
        let mut expected = vec![a.uuid, b.uuid];
        expected.sort();
        assert_eq!(pending, expected);

        unqueue_sync(&mut *conn, a.uuid).await.unwrap();
        assert_eq!(pending_sync(&mut *conn).await.unwrap(), vec![b.uuid]);
    }

    #[test]
    fn test_carry_derived_fields() {
        let current = json!({"citation_count": 4, "titles": []});
        let mut body = json!({"titles": [{"title": "new"}]});
        carry_derived_fields(&current, &mut body);
        assert_eq!(body["citation_count"], 4);
        assert_eq!(body["titles"][0]["title"], "new");
    }
}
