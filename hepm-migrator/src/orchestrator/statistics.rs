//! Per-step reports

use serde::Serialize;
use uuid::Uuid;

/// Step 1 outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Legacy ids of every keyed fragment, in input order
    pub legacy_ids: Vec<i64>,
    /// Rows inserted or overwritten
    pub written: usize,
    /// Fragments older than the stored row (left untouched)
    pub stale: usize,
    /// Rows stored with `valid = false`
    pub invalid: usize,
    /// Fragments without a recoverable legacy id
    pub skipped: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.legacy_ids.extend(other.legacy_ids);
        self.written += other.written;
        self.stale += other.stale;
        self.invalid += other.invalid;
        self.skipped += other.skipped;
    }
}

/// Step 2 outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrateReport {
    /// Legacy ids processed, in selection order
    pub processed: Vec<i64>,
    pub migrated: usize,
    pub broken: usize,
    /// Target records written, tombstoned or re-linked, in processing order
    pub records: Vec<Uuid>,
    /// Other records whose aggregates changed
    pub reindex: Vec<Uuid>,
}

impl MigrateReport {
    /// Records step 3 should republish
    pub fn affected(&self) -> Vec<Uuid> {
        let mut ids = self.records.clone();
        for uuid in &self.reindex {
            if !ids.contains(uuid) {
                ids.push(*uuid);
            }
        }
        ids
    }
}

/// Step 3 outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReindexReport {
    pub indexed: usize,
    pub removed: usize,
}

/// Outcome of one or more steps
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrate: Option<MigrateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reindex: Option<ReindexReport>,
}

impl RunReport {
    pub fn migrated(&self) -> usize {
        self.migrate.as_ref().map_or(0, |m| m.migrated)
    }

    pub fn broken(&self) -> usize {
        self.migrate.as_ref().map_or(0, |m| m.broken)
    }

    pub fn skipped(&self) -> usize {
        self.ingest.as_ref().map_or(0, |i| i.skipped + i.stale)
    }

    /// `migrated=N broken=N skipped=N`
    pub fn summary(&self) -> String {
        format!(
            "migrated={} broken={} skipped={}",
            self.migrated(),
            self.broken(),
            self.skipped()
        )
    }
}
