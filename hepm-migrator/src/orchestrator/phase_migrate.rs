//! Step 2: mirror → record store
//!
//! Every mirror row is migrated in its own transaction, so a failing record
//! rolls back its identifier changes and is marked `BROKEN` without
//! affecting the rest of the batch. Rows carrying merge markers run after
//! all other rows: survivors (`981`) first, then merged-away rows (`970`).
//!
//! Records a row changes are queued for relation synchronization in the
//! same transaction. The queue is drained at the end of every run, so
//! synchronization that failed or never ran is picked up by the next one.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use hepm_common::events::{MigrationEvent, PipelineStep};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MigrateReport, Migrator};
use crate::db::{mirror, records};
use crate::error::{MigrationError, Result};
use crate::identifiers::RedirectOutcome;
use crate::indexer::IndexBatch;
use crate::model::{EntityKind, IntermediateRecord, MirrorEntry, PidKey, SelectionMode};
use crate::transform::EXTERNAL_PID_TYPES;
use crate::utils::retry_on_lock;

/// Outcome of one mirror row
enum RowOutcome {
    Migrated { touched: Vec<Uuid> },
    Broken,
}

/// Records changed inside one row's transaction
struct Persisted {
    uuid: Option<Uuid>,
    touched: Vec<Uuid>,
}

impl Migrator {
    /// Step 2 over the mirror, then publish what changed
    pub async fn migrate_from_mirror(
        &self,
        mode: SelectionMode,
        date_from: Option<DateTime<Utc>>,
    ) -> Result<MigrateReport> {
        let report = self.migrate_rows(mode, date_from, None).await?;

        let batch = IndexBatch::deferred(self.indexer.clone());
        let published = async {
            batch.publish(&self.db, &report.affected()).await?;
            batch.flush().await
        };
        if let Err(e) = published.await {
            warn!(error = %e, "Migrated records not handed to indexer; run step 3");
        }
        Ok(report)
    }

    /// Step 2 restricted to `legacy_ids`, without publishing
    pub(super) async fn migrate_legacy_ids(
        &self,
        legacy_ids: &[i64],
        mode: SelectionMode,
        date_from: Option<DateTime<Utc>>,
    ) -> Result<MigrateReport> {
        let only: BTreeSet<i64> = legacy_ids.iter().copied().collect();
        self.migrate_rows(mode, date_from, Some(&only)).await
    }

    /// Decode, mirror, migrate, synchronize and index one fragment
    pub async fn migrate_record(&self, raw: &[u8]) -> Result<MigrateReport> {
        let ingest = self.ingest_fragments(vec![raw.to_vec()]).await?;
        let Some(legacy_id) = ingest.legacy_ids.first().copied() else {
            return Err(MigrationError::Decode(
                "fragment carries no recoverable legacy id".to_string(),
            ));
        };

        let entry = mirror::get(&self.db, legacy_id)
            .await?
            .ok_or_else(|| MigrationError::not_found("legacy", &legacy_id.to_string()))?;
        let report = self.migrate_entries(vec![entry]).await?;

        let batch = IndexBatch::immediate(self.indexer.clone());
        batch.publish(&self.db, &report.affected()).await?;
        Ok(report)
    }

    pub(super) async fn migrate_rows(
        &self,
        mode: SelectionMode,
        date_from: Option<DateTime<Utc>>,
        only: Option<&BTreeSet<i64>>,
    ) -> Result<MigrateReport> {
        let mut entries = mirror::select_for_migration(&self.db, mode, date_from).await?;
        if let Some(only) = only {
            entries.retain(|entry| only.contains(&entry.legacy_id));
        }
        info!(rows = entries.len(), mode = ?mode, "Mirror rows selected");
        self.migrate_entries(entries).await
    }

    async fn migrate_entries(&self, entries: Vec<MirrorEntry>) -> Result<MigrateReport> {
        self.step_started(PipelineStep::Migrate);

        let (plain, marked): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| !entry.decoded.as_ref().is_some_and(IntermediateRecord::has_merge_markers));
        let (merged_away, survivors): (Vec<_>, Vec<_>) = marked
            .into_iter()
            .partition(|entry| entry.decoded.as_ref().is_some_and(IntermediateRecord::is_merged_away));

        let mut report = MigrateReport::default();
        let mut touched: Vec<Uuid> = Vec::new();

        for wave in [plain, survivors, merged_away] {
            if wave.is_empty() {
                continue;
            }
            for chunk in wave.chunks(self.config.migration.chunk_size.max(1)) {
                let mut results: Vec<(usize, Result<RowOutcome>)> = stream::iter(0..chunk.len())
                    .map(|index| {
                        let entry = &chunk[index];
                        async move { (index, self.migrate_entry(entry).await) }
                    })
                    .buffer_unordered(self.config.worker_count())
                    .collect()
                    .await;
                results.sort_by_key(|(index, _)| *index);

                for (index, result) in results {
                    report.processed.push(chunk[index].legacy_id);
                    match result? {
                        RowOutcome::Migrated { touched: changed } => {
                            report.migrated += 1;
                            for uuid in changed {
                                if !touched.contains(&uuid) {
                                    touched.push(uuid);
                                }
                            }
                        }
                        RowOutcome::Broken => report.broken += 1,
                    }
                }
            }
        }

        let queued = records::pending_sync(&self.db).await?;
        let leftover = queued.iter().filter(|uuid| !touched.contains(uuid)).count();
        if leftover > 0 {
            info!(leftover, "Resuming relation synchronization from an earlier run");
        }
        for uuid in queued {
            if !touched.contains(&uuid) {
                touched.push(uuid);
            }
        }

        let sync = self.synchronizer.run(&touched).await?;
        if !sync.failed.is_empty() {
            warn!(
                failed = sync.failed.len(),
                "Relation synchronization incomplete; records stay queued for the next run"
            );
        }
        report.records = touched;
        report.reindex = sync.reindex;

        self.step_completed(
            PipelineStep::Migrate,
            report.processed.len(),
            report.migrated,
            report.broken,
            0,
        );
        Ok(report)
    }

    async fn migrate_entry(&self, entry: &MirrorEntry) -> Result<RowOutcome> {
        let record = match (&entry.decoded, entry.valid) {
            (Some(record), Some(true)) => record,
            _ => {
                let reason = entry
                    .error
                    .clone()
                    .unwrap_or_else(|| "record did not decode".to_string());
                self.mark_row_broken(entry.legacy_id, &reason).await?;
                return Ok(RowOutcome::Broken);
            }
        };

        let legacy_id = entry.legacy_id;
        let result = retry_on_lock("migrate record", self.config.migration.lock_wait_ms, || async move {
            let mut tx = self.db.begin().await?;
            let persisted = self.persist(&mut tx, record).await?;
            mirror::mark_migrated(&mut *tx, legacy_id).await?;
            tx.commit().await?;
            Ok(persisted)
        })
        .await;

        match result {
            Ok(persisted) => {
                debug!(legacy_id, uuid = ?persisted.uuid, "Record migrated");
                self.event_bus.emit_lossy(MigrationEvent::RecordMigrated {
                    legacy_id,
                    uuid: persisted.uuid,
                    timestamp: Utc::now(),
                });
                Ok(RowOutcome::Migrated {
                    touched: persisted.touched,
                })
            }
            Err(e) if e.is_batch_fatal() => Err(e),
            Err(e) => {
                self.mark_row_broken(legacy_id, &e.to_string()).await?;
                Ok(RowOutcome::Broken)
            }
        }
    }

    /// Transform and persist one record, its identifiers and merges
    async fn persist(&self, conn: &mut SqliteConnection, record: &IntermediateRecord) -> Result<Persisted> {
        let kind = record
            .kind
            .ok_or_else(|| MigrationError::Transform("record has no known collection".to_string()))?;
        let recid = record
            .control_number
            .ok_or_else(|| MigrationError::Transform("record has no control number".to_string()))?;

        if let Some(target) = record.merged_into {
            let old = PidKey::recid(kind, recid);
            let new = PidKey::recid(kind, target);
            let outcome = self
                .identifiers
                .redirect(conn, &old, &new)
                .await
                .map_err(|e| match e {
                    MigrationError::NotFound { .. } => MigrationError::Transform(format!(
                        "record {} was merged into {}, which is not migrated",
                        recid, target
                    )),
                    other => other,
                })?;
            let touched = self.merge_touched(conn, kind, recid, &outcome).await?;
            queue_all(conn, &touched).await?;
            return Ok(Persisted { uuid: None, touched });
        }

        let output = self.transformer.transform(conn, record).await?;
        let own = output.own_pid();
        if !output.unresolved.is_empty() {
            debug!(pid = %own, unresolved = output.unresolved.len(), "Record keeps unlinked references");
        }

        let existing = match self.identifiers.owner_of(conn, &own).await? {
            Some(uuid) => records::get(&mut *conn, uuid)
                .await?
                .filter(|current| current.kind == output.kind),
            None => None,
        };

        let mut body = output.body;
        let (stored, changed) = match existing {
            Some(current) => {
                records::carry_derived_fields(&current.json_body, &mut body);
                records::update(conn, current.uuid, body, output.deleted).await?
            }
            None => (records::create(conn, output.kind, body, output.deleted).await?, true),
        };

        self.identifiers.assign(conn, &own, stored.uuid).await?;

        let mut touched = Vec::new();
        if changed {
            touched.push(stored.uuid);
        }
        for merged in &record.merged_records {
            let old = PidKey::recid(kind, *merged);
            let outcome = self.identifiers.redirect(conn, &old, &own).await?;
            for uuid in self.merge_touched(conn, kind, *merged, &outcome).await? {
                if !touched.contains(&uuid) {
                    touched.push(uuid);
                }
            }
        }

        if output.deleted {
            let released = self.identifiers.release_all(conn, stored.uuid).await?;
            debug!(uuid = %stored.uuid, released, "Identifiers of deleted record released");
        } else {
            self.identifiers
                .sync_record_pids(conn, stored.uuid, &output.external_pids, &EXTERNAL_PID_TYPES)
                .await?;
        }

        queue_all(conn, &touched).await?;
        Ok(Persisted {
            uuid: Some(stored.uuid),
            touched,
        })
    }

    /// Records to resynchronize after merging `kind`/`recid` away
    ///
    /// The tombstone, plus literature pointing at the old identifier when
    /// the merge changed where it leads.
    async fn merge_touched(
        &self,
        conn: &mut SqliteConnection,
        kind: EntityKind,
        recid: i64,
        outcome: &RedirectOutcome,
    ) -> Result<Vec<Uuid>> {
        let mut touched: Vec<Uuid> = outcome.deleted_record.into_iter().collect();
        if outcome.changed {
            let needle = self.transformer.refs().needle(kind, recid);
            for uuid in records::literature_mentioning(&mut *conn, &needle).await? {
                if uuid != outcome.survivor && !touched.contains(&uuid) {
                    touched.push(uuid);
                }
            }
        }
        Ok(touched)
    }

    async fn mark_row_broken(&self, legacy_id: i64, reason: &str) -> Result<()> {
        warn!(legacy_id, error = %reason, "Record broken");
        retry_on_lock("mark broken", self.config.migration.lock_wait_ms, || {
            mirror::mark_broken(&self.db, legacy_id, reason)
        })
        .await?;
        self.event_bus.emit_lossy(MigrationEvent::RecordBroken {
            legacy_id,
            error: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

async fn queue_all(conn: &mut SqliteConnection, uuids: &[Uuid]) -> Result<()> {
    for uuid in uuids {
        records::queue_sync(&mut *conn, *uuid).await?;
    }
    Ok(())
}
