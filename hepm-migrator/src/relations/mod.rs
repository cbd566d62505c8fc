//! Relation synchronizer
//!
//! Keeps citation edges, entity link rows and the derived aggregates on
//! their targets consistent with record content. Pointers are resolved to
//! records and compared with the stored edges; the previous persisted
//! version decides whether every target needs its aggregate refreshed.

pub mod links;

pub use links::{author_identities, earliest_date, extract_links, shares_author, Link, LinkKind};

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MigratorConfig;
use crate::db::relations::{self as rel, LinkTable};
use crate::db::records;
use crate::error::{MigrationError, Result};
use crate::identifiers::IdentifierManager;
use crate::indexer::IndexBatch;
use crate::model::{EntityKind, PidKey, TargetRecord};
use crate::transform::RefFactory;
use crate::utils::retry_on_lock;

/// Resolved relation targets of one literature record: (link table, record),
/// with no table for citation edges
type Targets = BTreeSet<(Option<LinkTable>, Uuid)>;

/// Outcome of one synchronization batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Input ids, in input order
    pub processed: Vec<Uuid>,
    /// Other records whose displayed state changed
    pub reindex: Vec<Uuid>,
    /// Records whose synchronization failed, with the reason
    pub failed: Vec<(Uuid, String)>,
}

#[derive(Clone)]
pub struct RelationSynchronizer {
    pool: SqlitePool,
    identifiers: IdentifierManager,
    refs: RefFactory,
    self_citations: bool,
    worker_count: usize,
    lock_wait_ms: u64,
}

impl RelationSynchronizer {
    pub fn new(pool: SqlitePool, config: &MigratorConfig, identifiers: IdentifierManager) -> Self {
        Self {
            pool,
            identifiers,
            refs: RefFactory::new(&config.records_base_url),
            self_citations: config.features.enable_self_citations,
            worker_count: config.worker_count(),
            lock_wait_ms: config.migration.lock_wait_ms,
        }
    }

    /// Synchronize `ids` and hand the affected records to `batch`
    ///
    /// Returns the input ids in input order. Ids of kinds without relations,
    /// or of records that do not exist, pass through untouched.
    pub async fn synchronize(&self, ids: &[Uuid], batch: &IndexBatch) -> Result<Vec<Uuid>> {
        let report = self.run(ids).await?;
        if !report.reindex.is_empty() {
            if let Err(e) = batch.publish(&self.pool, &report.reindex).await {
                warn!(error = %e, count = report.reindex.len(), "Failed to hand reindex set to indexer");
            }
        }
        Ok(report.processed)
    }

    /// Synchronize `ids` without publishing anything
    pub async fn run(&self, ids: &[Uuid]) -> Result<SyncReport> {
        let mut results: Vec<(usize, Result<BTreeSet<Uuid>>)> = stream::iter(ids.iter().copied().enumerate())
            .map(|(index, uuid)| async move { (index, self.sync_with_retry(uuid).await) })
            .buffer_unordered(self.worker_count)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let inputs: BTreeSet<Uuid> = ids.iter().copied().collect();
        let mut report = SyncReport {
            processed: ids.to_vec(),
            ..Default::default()
        };
        let mut reindex = BTreeSet::new();

        for (index, result) in results {
            match result {
                Ok(affected) => reindex.extend(affected),
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    warn!(uuid = %ids[index], error = %e, "Relation synchronization failed");
                    report.failed.push((ids[index], e.to_string()));
                }
            }
        }

        report.reindex = reindex.difference(&inputs).copied().collect();
        debug!(
            processed = report.processed.len(),
            reindex = report.reindex.len(),
            failed = report.failed.len(),
            "Relation synchronization batch done"
        );
        Ok(report)
    }

    async fn sync_with_retry(&self, uuid: Uuid) -> Result<BTreeSet<Uuid>> {
        retry_on_lock("synchronize relations", self.lock_wait_ms, || async move {
            let mut tx = self.pool.begin().await?;
            let affected = self.sync_one(&mut tx, uuid).await?;
            records::unqueue_sync(&mut *tx, uuid).await?;
            tx.commit().await?;
            Ok(affected)
        })
        .await
    }

    /// Synchronize one record; returns the other records to reindex
    pub async fn sync_one(&self, conn: &mut SqliteConnection, uuid: Uuid) -> Result<BTreeSet<Uuid>> {
        let Some(current) = records::get(&mut *conn, uuid).await? else {
            debug!(uuid = %uuid, "No record to synchronize");
            return Ok(BTreeSet::new());
        };
        let previous = records::previous_version(&mut *conn, &current).await?;

        let mut affected = match current.kind {
            EntityKind::Literature => self.sync_literature(conn, &current, previous.as_ref()).await?,
            EntityKind::Author
            | EntityKind::Conference
            | EntityKind::Institution
            | EntityKind::Experiment => self.sync_entity(conn, &current, previous.as_ref()).await?,
            _ => BTreeSet::new(),
        };

        let was_deleted = previous.as_ref().map(|p| p.deleted);
        if current.deleted && was_deleted == Some(false) {
            affected.extend(self.detach_incoming(conn, &current).await?);
        } else if !current.deleted && was_deleted != Some(false) {
            self.backfill(conn, &current).await?;
        }

        affected.remove(&uuid);
        Ok(affected)
    }

    async fn sync_literature(
        &self,
        conn: &mut SqliteConnection,
        current: &TargetRecord,
        previous: Option<&TargetRecord>,
    ) -> Result<BTreeSet<Uuid>> {
        let whole_set_changed = match previous {
            Some(p) => {
                p.deleted != current.deleted
                    || earliest_date(&p.json_body) != earliest_date(&current.json_body)
            }
            None => current.deleted,
        };
        let mut affected = self.reconcile(conn, current, whole_set_changed).await?;

        if let Some(previous) = previous {
            if self.self_citations
                && author_identities(&previous.json_body) != author_identities(&current.json_body)
            {
                affected.extend(self.recompute_self_citations(conn, current).await?);
            }
        }

        Ok(affected)
    }

    async fn sync_entity(
        &self,
        conn: &mut SqliteConnection,
        current: &TargetRecord,
        previous: Option<&TargetRecord>,
    ) -> Result<BTreeSet<Uuid>> {
        let Some(previous) = previous else {
            return Ok(BTreeSet::new());
        };
        let changed = previous.deleted != current.deleted
            || without_derived(&previous.json_body) != without_derived(&current.json_body);
        if !changed {
            return Ok(BTreeSet::new());
        }
        self.literature_linking_to(conn, current).await
    }

    /// Bring the stored edges and links of `literature` in line with its body
    ///
    /// Pointers are resolved to records before comparing, so two pointers
    /// reaching the same record yield one edge. Targets whose edge or link
    /// is added or removed are refreshed; with `refresh_all`, every current
    /// target is refreshed too. Returns the refreshed targets.
    async fn reconcile(
        &self,
        conn: &mut SqliteConnection,
        literature: &TargetRecord,
        refresh_all: bool,
    ) -> Result<BTreeSet<Uuid>> {
        let desired = if literature.deleted {
            Targets::new()
        } else {
            self.resolve_links(conn, literature).await?
        };
        let stored = self.stored_targets(conn, literature.uuid).await?;

        let mut changed: Targets = desired.symmetric_difference(&stored).copied().collect();
        if refresh_all {
            changed.extend(desired.iter().copied());
        }

        let mut affected = BTreeSet::new();
        for (table, target) in changed {
            let wanted = desired.contains(&(table, target));
            match table {
                None => {
                    if wanted {
                        let is_self = self.is_self_citation(conn, literature, target).await?;
                        rel::upsert_citation(&mut *conn, literature.uuid, target, is_self).await?;
                    } else {
                        rel::delete_citation(&mut *conn, literature.uuid, target).await?;
                    }
                    self.refresh_citation_count(conn, target).await?;
                }
                Some(table) => {
                    if wanted {
                        rel::upsert_link(&mut *conn, table, target, literature.uuid).await?;
                    } else {
                        rel::delete_link(&mut *conn, table, target, literature.uuid).await?;
                    }
                    self.refresh_link_count(conn, table, target).await?;
                }
            }
            affected.insert(target);
        }

        Ok(affected)
    }

    /// Records the body of `literature` points at, through redirects
    async fn resolve_links(&self, conn: &mut SqliteConnection, literature: &TargetRecord) -> Result<Targets> {
        let mut targets = Targets::new();
        for link in extract_links(&literature.json_body) {
            let Some(target) = self.resolve_target(conn, &link.target).await? else {
                continue;
            };
            let table = link.kind.table();
            if table.is_none() && target == literature.uuid && !self.self_citations {
                continue;
            }
            targets.insert((table, target));
        }
        Ok(targets)
    }

    async fn stored_targets(&self, conn: &mut SqliteConnection, literature: Uuid) -> Result<Targets> {
        let mut targets: Targets = rel::cited_by(&mut *conn, literature)
            .await?
            .into_iter()
            .map(|cited| (None, cited))
            .collect();
        for table in LinkTable::ALL {
            let entities = rel::linked_entities(&mut *conn, table, literature).await?;
            targets.extend(entities.into_iter().map(|entity| (Some(table), entity)));
        }
        Ok(targets)
    }

    async fn is_self_citation(&self, conn: &mut SqliteConnection, citer: &TargetRecord, cited: Uuid) -> Result<bool> {
        if cited == citer.uuid {
            return Ok(true);
        }
        Ok(match records::get(&mut *conn, cited).await? {
            Some(record) => shares_author(&citer.json_body, &record.json_body),
            None => false,
        })
    }

    /// Complete edges and links from literature migrated before `record`
    async fn backfill(&self, conn: &mut SqliteConnection, record: &TargetRecord) -> Result<()> {
        if !record.kind.is_linkable() {
            return Ok(());
        }
        let Some(recid) = record.control_number() else {
            return Ok(());
        };
        let needle = self.refs.needle(record.kind, recid);

        let mut linked = 0usize;
        for candidate in records::literature_mentioning(&mut *conn, &needle).await? {
            if candidate == record.uuid {
                continue;
            }
            let Some(literature) = records::get(&mut *conn, candidate).await? else {
                continue;
            };
            if literature.deleted {
                continue;
            }
            if self.reconcile(conn, &literature, false).await?.contains(&record.uuid) {
                linked += 1;
            }
        }

        if linked > 0 {
            debug!(uuid = %record.uuid, pid = %PidKey::recid(record.kind, recid), linked, "Back-filled relations");
        }
        match LinkTable::for_kind(record.kind) {
            Some(table) => self.refresh_link_count(conn, table, record.uuid).await,
            None => self.refresh_citation_count(conn, record.uuid).await,
        }
    }

    /// Re-resolve literature pointing at a record that was just deleted
    ///
    /// Edges follow the record's identifier to a merge survivor or are
    /// dropped, so the tombstone keeps no incoming relations.
    async fn detach_incoming(&self, conn: &mut SqliteConnection, record: &TargetRecord) -> Result<BTreeSet<Uuid>> {
        let incoming = match LinkTable::for_kind(record.kind) {
            Some(table) => rel::linked_literature(&mut *conn, table, record.uuid).await?,
            None if record.kind == EntityKind::Literature => rel::citers_of(&mut *conn, record.uuid).await?,
            None => return Ok(BTreeSet::new()),
        };

        let mut affected = BTreeSet::new();
        for source in incoming {
            if source == record.uuid {
                continue;
            }
            let Some(literature) = records::get(&mut *conn, source).await? else {
                continue;
            };
            affected.extend(self.reconcile(conn, &literature, false).await?);
            affected.insert(source);
        }
        Ok(affected)
    }

    async fn recompute_self_citations(
        &self,
        conn: &mut SqliteConnection,
        current: &TargetRecord,
    ) -> Result<BTreeSet<Uuid>> {
        let mut affected = BTreeSet::new();
        for (other, citer_side, was_self) in rel::edges_touching(&mut *conn, current.uuid).await? {
            let Some(counterparty) = records::get(&mut *conn, other).await? else {
                continue;
            };
            let is_self = other == current.uuid || shares_author(&current.json_body, &counterparty.json_body);
            if is_self == was_self {
                continue;
            }
            let (citer, cited) = if citer_side {
                (current.uuid, other)
            } else {
                (other, current.uuid)
            };
            if rel::set_self_citation(&mut *conn, citer, cited, is_self).await? {
                self.refresh_citation_count(conn, cited).await?;
                affected.insert(other);
            }
        }
        Ok(affected)
    }

    /// Literature whose display depends on `entity`
    async fn literature_linking_to(
        &self,
        conn: &mut SqliteConnection,
        entity: &TargetRecord,
    ) -> Result<BTreeSet<Uuid>> {
        if let Some(table) = LinkTable::for_kind(entity.kind) {
            return Ok(rel::linked_literature(&mut *conn, table, entity.uuid)
                .await?
                .into_iter()
                .collect());
        }

        let Some(recid) = entity.control_number() else {
            return Ok(BTreeSet::new());
        };
        let own = PidKey::recid(entity.kind, recid).to_string();
        let mut linking = BTreeSet::new();
        for candidate in records::literature_mentioning(&mut *conn, &self.refs.needle(entity.kind, recid)).await? {
            if let Some(literature) = records::get(&mut *conn, candidate).await? {
                if author_identities(&literature.json_body).contains(&own) {
                    linking.insert(candidate);
                }
            }
        }
        Ok(linking)
    }

    async fn resolve_target(&self, conn: &mut SqliteConnection, key: &PidKey) -> Result<Option<Uuid>> {
        match self.identifiers.resolve(conn, key).await {
            Ok(uuid) => Ok(Some(uuid)),
            Err(MigrationError::NotFound { .. }) => Ok(None),
            Err(MigrationError::Conflict { .. }) => {
                warn!(pid = %key, "Skipping link through looping redirects");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_citation_count(&self, conn: &mut SqliteConnection, cited: Uuid) -> Result<()> {
        let count = rel::count_citations(&mut *conn, cited, self.self_citations).await?;
        records::set_derived_field(conn, cited, "citation_count", count).await
    }

    async fn refresh_link_count(&self, conn: &mut SqliteConnection, table: LinkTable, entity: Uuid) -> Result<()> {
        let count = rel::count_links(&mut *conn, table, entity).await?;
        records::set_derived_field(conn, entity, table.aggregate_field(), count).await
    }
}

fn without_derived(body: &Value) -> Value {
    let mut body = body.clone();
    if let Some(obj) = body.as_object_mut() {
        for field in records::DERIVED_FIELDS {
            obj.remove(field);
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pidstore;
    use crate::indexer::InMemoryIndex;
    use serde_json::json;
    use std::sync::Arc;

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = hepm_common::db::init_database(&dir.path().join("sync.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    fn synchronizer(pool: &SqlitePool) -> RelationSynchronizer {
        synchronizer_with(pool, false)
    }

    fn synchronizer_with(pool: &SqlitePool, self_citations: bool) -> RelationSynchronizer {
        let mut config = MigratorConfig::default();
        config.records_base_url = "http://h/api".into();
        config.features.enable_self_citations = self_citations;
        RelationSynchronizer::new(pool.clone(), &config, IdentifierManager::new(true))
    }

    async fn seed(pool: &SqlitePool, kind: EntityKind, recid: i64, body: Value) -> Uuid {
        let mut conn = pool.acquire().await.unwrap();
        let record = records::create(&mut conn, kind, body, false).await.unwrap();
        IdentifierManager::new(true)
            .assign(&mut conn, &PidKey::recid(kind, recid), record.uuid)
            .await
            .unwrap();
        record.uuid
    }

    fn cites(recid: i64, cited: &[i64]) -> Value {
        json!({
            "control_number": recid,
            "references": cited
                .iter()
                .map(|c| json!({"record": {"$ref": format!("http://h/api/literature/{}", c)}}))
                .collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_unsupported_kinds_pass_through_in_order() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer(&pool);
        let job = seed(&pool, EntityKind::Job, 1, json!({"control_number": 1})).await;
        let missing = Uuid::new_v4();

        let index = Arc::new(InMemoryIndex::new(pool.clone()));
        let batch = IndexBatch::immediate(index.clone());
        let out = sync.synchronize(&[missing, job], &batch).await.unwrap();
        assert_eq!(out, vec![missing, job]);
        assert!(index.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_citation_edge_and_count() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer(&pool);
        let cited = seed(&pool, EntityKind::Literature, 666, cites(666, &[])).await;
        let citer = seed(&pool, EntityKind::Literature, 667, cites(667, &[666])).await;

        let report = sync.run(&[cited, citer]).await.unwrap();
        assert_eq!(report.processed, vec![cited, citer]);
        assert!(report.failed.is_empty());

        assert_eq!(rel::citers_of(&pool, cited).await.unwrap(), vec![citer]);
        let record = records::get(&pool, cited).await.unwrap().unwrap();
        assert_eq!(record.json_body["citation_count"], 1);
    }

    #[tokio::test]
    async fn test_late_citation_target_is_backfilled() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer(&pool);

        let citer = seed(&pool, EntityKind::Literature, 2, cites(2, &[1])).await;
        sync.run(&[citer]).await.unwrap();

        let cited = seed(&pool, EntityKind::Literature, 1, cites(1, &[])).await;
        sync.run(&[cited]).await.unwrap();

        assert_eq!(rel::citers_of(&pool, cited).await.unwrap(), vec![citer]);
        let record = records::get(&pool, cited).await.unwrap().unwrap();
        assert_eq!(record.json_body["citation_count"], 1);
    }

    #[tokio::test]
    async fn test_conference_link_counts_contributions() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer(&pool);
        let conference = seed(&pool, EntityKind::Conference, 5, json!({"control_number": 5})).await;
        let paper = seed(
            &pool,
            EntityKind::Literature,
            10,
            json!({
                "control_number": 10,
                "publication_info": [{"conference_record": {"$ref": "http://h/api/conferences/5"}}]
            }),
        )
        .await;

        let report = sync.run(&[paper]).await.unwrap();
        assert_eq!(report.reindex, vec![conference]);
        assert_eq!(
            rel::linked_literature(&pool, LinkTable::Conference, conference).await.unwrap(),
            vec![paper]
        );
        let record = records::get(&pool, conference).await.unwrap().unwrap();
        assert_eq!(record.json_body["number_of_contributions"], 1);
    }

    #[tokio::test]
    async fn test_pointers_to_same_record_keep_one_edge() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer(&pool);
        let survivor = seed(&pool, EntityKind::Literature, 1, cites(1, &[])).await;
        pidstore::upsert_redirect(&pool, &PidKey::new("lit", "2"), &PidKey::new("lit", "1"), survivor)
            .await
            .unwrap();

        // Old pointer through the merged identifier
        let citer = seed(&pool, EntityKind::Literature, 3, cites(3, &[2])).await;
        sync.run(&[citer]).await.unwrap();
        assert_eq!(rel::citers_of(&pool, survivor).await.unwrap(), vec![citer]);

        // The pointer moves to the survivor itself
        let mut conn = pool.acquire().await.unwrap();
        records::update(&mut conn, citer, cites(3, &[1]), false).await.unwrap();
        drop(conn);
        sync.run(&[citer]).await.unwrap();

        assert_eq!(rel::citers_of(&pool, survivor).await.unwrap(), vec![citer]);
        let record = records::get(&pool, survivor).await.unwrap().unwrap();
        assert_eq!(record.json_body["citation_count"], 1);

        // Both pointers at once still make one edge
        let mut conn = pool.acquire().await.unwrap();
        records::update(&mut conn, citer, cites(3, &[2, 1]), false).await.unwrap();
        drop(conn);
        sync.run(&[citer]).await.unwrap();
        assert_eq!(rel::count_citations(&pool, survivor, false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_self_loop_excluded_when_self_citations_enabled() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer_with(&pool, true);
        let paper = seed(&pool, EntityKind::Literature, 5, cites(5, &[5])).await;

        sync.run(&[paper]).await.unwrap();

        assert_eq!(rel::citers_of(&pool, paper).await.unwrap(), vec![paper]);
        let record = records::get(&pool, paper).await.unwrap().unwrap();
        assert_eq!(record.json_body["citation_count"], 0);
    }

    #[tokio::test]
    async fn test_successful_sync_leaves_pending_queue() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer(&pool);
        let cited = seed(&pool, EntityKind::Literature, 666, cites(666, &[])).await;
        let citer = seed(&pool, EntityKind::Literature, 667, cites(667, &[666])).await;
        records::queue_sync(&pool, cited).await.unwrap();
        records::queue_sync(&pool, citer).await.unwrap();

        let report = sync.run(&[cited, citer]).await.unwrap();
        assert!(report.failed.is_empty());
        assert!(records::pending_sync(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_edges_are_repaired() {
        let (_dir, pool) = setup().await;
        let sync = synchronizer(&pool);
        let cited = seed(&pool, EntityKind::Literature, 666, cites(666, &[])).await;
        let citer = seed(&pool, EntityKind::Literature, 667, cites(667, &[666])).await;
        sync.run(&[cited, citer]).await.unwrap();

        rel::delete_citation(&pool, citer, cited).await.unwrap();
        let report = sync.run(&[citer]).await.unwrap();

        assert_eq!(report.reindex, vec![cited]);
        assert_eq!(rel::citers_of(&pool, cited).await.unwrap(), vec![citer]);
    }
}
