//! Citation edges and entity link tables
//!
//! Written only by the relation synchronizer.

use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use super::parse_uuid;
use crate::error::Result;
use crate::model::EntityKind;

/// Link table per linked entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkTable {
    Conference,
    Institution,
    Experiment,
}

impl LinkTable {
    pub const ALL: [LinkTable; 3] = [LinkTable::Conference, LinkTable::Institution, LinkTable::Experiment];

    pub fn for_kind(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Conference => Some(LinkTable::Conference),
            EntityKind::Institution => Some(LinkTable::Institution),
            EntityKind::Experiment => Some(LinkTable::Experiment),
            _ => None,
        }
    }

    pub fn kind(self) -> EntityKind {
        match self {
            LinkTable::Conference => EntityKind::Conference,
            LinkTable::Institution => EntityKind::Institution,
            LinkTable::Experiment => EntityKind::Experiment,
        }
    }

    fn table(self) -> &'static str {
        match self {
            LinkTable::Conference => "conference_literature",
            LinkTable::Institution => "institution_literature",
            LinkTable::Experiment => "experiment_literature",
        }
    }

    fn entity_column(self) -> &'static str {
        match self {
            LinkTable::Conference => "conference_uuid",
            LinkTable::Institution => "institution_uuid",
            LinkTable::Experiment => "experiment_uuid",
        }
    }

    /// Derived aggregate stored on the linked entity
    pub fn aggregate_field(self) -> &'static str {
        match self {
            LinkTable::Conference => "number_of_contributions",
            LinkTable::Institution | LinkTable::Experiment => "number_of_papers",
        }
    }
}

/// Insert or refresh a citation edge
pub async fn upsert_citation<'e, E>(executor: E, citer: Uuid, cited: Uuid, is_self_citation: bool) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO records_citations (citer_id, cited_id, is_self_citation)
        VALUES (?, ?, ?)
        ON CONFLICT(citer_id, cited_id) DO UPDATE SET
            is_self_citation = excluded.is_self_citation
        "#,
    )
    .bind(citer.to_string())
    .bind(cited.to_string())
    .bind(is_self_citation)
    .execute(executor)
    .await?;

    Ok(())
}

/// Remove a citation edge
pub async fn delete_citation<'e, E>(executor: E, citer: Uuid, cited: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM records_citations WHERE citer_id = ? AND cited_id = ?")
        .bind(citer.to_string())
        .bind(cited.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Citation edges touching `uuid` in either direction: (counterparty, is_citer_side, is_self)
///
/// `is_citer_side` is true when `uuid` is the citer.
pub async fn edges_touching<'e, E>(executor: E, uuid: Uuid) -> Result<Vec<(Uuid, bool, bool)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT cited_id AS other, 1 AS citer_side, is_self_citation FROM records_citations WHERE citer_id = ?
        UNION ALL
        SELECT citer_id AS other, 0 AS citer_side, is_self_citation FROM records_citations WHERE cited_id = ?
        "#,
    )
    .bind(uuid.to_string())
    .bind(uuid.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            Ok((
                parse_uuid(&row.get::<String, _>("other"))?,
                row.get::<i64, _>("citer_side") != 0,
                row.get::<i64, _>("is_self_citation") != 0,
            ))
        })
        .collect()
}

/// Set the self-citation flag of an existing edge
pub async fn set_self_citation<'e, E>(executor: E, citer: Uuid, cited: Uuid, is_self_citation: bool) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE records_citations SET is_self_citation = ?
        WHERE citer_id = ? AND cited_id = ? AND is_self_citation != ?
        "#,
    )
    .bind(is_self_citation)
    .bind(citer.to_string())
    .bind(cited.to_string())
    .bind(is_self_citation)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Number of live records citing `cited`
///
/// Edges from deleted citers never exist; `exclude_self` drops
/// self-citations.
pub async fn count_citations<'e, E>(executor: E, cited: Uuid, exclude_self: bool) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM records_citations
        WHERE cited_id = ? AND (? = 0 OR is_self_citation = 0)
        "#,
    )
    .bind(cited.to_string())
    .bind(exclude_self)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Citers of `cited`, ordered
pub async fn citers_of<'e, E>(executor: E, cited: Uuid) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT citer_id FROM records_citations WHERE cited_id = ? ORDER BY citer_id")
        .bind(cited.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("citer_id")))
        .collect()
}

/// Insert a literature↔entity link (no-op when present)
pub async fn upsert_link<'e, E>(executor: E, table: LinkTable, entity: Uuid, literature: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "INSERT INTO {} ({}, literature_uuid) VALUES (?, ?) ON CONFLICT DO NOTHING",
        table.table(),
        table.entity_column()
    );
    sqlx::query(&sql)
        .bind(entity.to_string())
        .bind(literature.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Remove a literature↔entity link
pub async fn delete_link<'e, E>(executor: E, table: LinkTable, entity: Uuid, literature: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "DELETE FROM {} WHERE {} = ? AND literature_uuid = ?",
        table.table(),
        table.entity_column()
    );
    sqlx::query(&sql)
        .bind(entity.to_string())
        .bind(literature.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Number of literature records linked to `entity`
pub async fn count_links<'e, E>(executor: E, table: LinkTable, entity: Uuid) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        table.table(),
        table.entity_column()
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(entity.to_string())
        .fetch_one(executor)
        .await?;

    Ok(count)
}

/// Literature records linked to `entity`, ordered
pub async fn linked_literature<'e, E>(executor: E, table: LinkTable, entity: Uuid) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT literature_uuid FROM {} WHERE {} = ? ORDER BY literature_uuid",
        table.table(),
        table.entity_column()
    );
    let rows = sqlx::query(&sql)
        .bind(entity.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("literature_uuid")))
        .collect()
}

/// Records cited by `citer`, ordered
pub async fn cited_by<'e, E>(executor: E, citer: Uuid) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT cited_id FROM records_citations WHERE citer_id = ? ORDER BY cited_id")
        .bind(citer.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("cited_id")))
        .collect()
}

/// Entities of `table` linked from `literature`, ordered
pub async fn linked_entities<'e, E>(executor: E, table: LinkTable, literature: Uuid) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {column} AS entity FROM {} WHERE literature_uuid = ? ORDER BY {column}",
        table.table(),
        column = table.entity_column()
    );
    let rows = sqlx::query(&sql)
        .bind(literature.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("entity")))
        .collect()
}
