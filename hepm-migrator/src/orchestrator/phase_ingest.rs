//! Step 1: legacy input → mirror

use std::path::Path;

use chrono::Utc;
use hepm_common::events::PipelineStep;
use hepm_common::time::parse_legacy_timestamp;
use tracing::{debug, info, warn};

use super::{IngestReport, Migrator};
use crate::db::mirror::{self, MirrorUpsert};
use crate::decoder::{self, DecodeOutcome};
use crate::error::{MigrationError, Result};
use crate::utils::retry_on_lock;

enum Stored {
    Skipped,
    Kept { legacy_id: i64, written: bool, valid: bool },
}

impl Migrator {
    /// Decode every fragment of `path` into the mirror, batch by batch as
    /// the file is read
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        self.step_started(PipelineStep::Ingest);

        let (mut batches, reader) = decoder::stream_input_file(path.to_path_buf());
        let mut report = IngestReport::default();
        while let Some(fragments) = batches.recv().await {
            report.merge(self.ingest_fragments(fragments).await?);
        }
        let fragments = reader
            .await
            .map_err(|e| internal(format!("input reader task failed: {}", e)))??;
        info!(path = %path.display(), fragments, "Legacy input read");

        self.step_completed(
            PipelineStep::Ingest,
            report.legacy_ids.len() + report.skipped,
            0,
            0,
            report.skipped + report.stale,
        );
        Ok(report)
    }

    /// Decode and store already split fragments
    pub async fn ingest_fragments(&self, fragments: Vec<Vec<u8>>) -> Result<IngestReport> {
        let decoded = tokio::task::spawn_blocking(move || {
            fragments
                .into_iter()
                .map(|raw| {
                    let outcome = decoder::decode(&raw);
                    (raw, outcome)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| internal(format!("decoder task failed: {}", e)))?;

        let mut report = IngestReport::default();
        for (raw, outcome) in &decoded {
            match self.store_fragment(raw, outcome).await? {
                Stored::Skipped => report.skipped += 1,
                Stored::Kept { legacy_id, written, valid } => {
                    report.legacy_ids.push(legacy_id);
                    if written {
                        report.written += 1;
                        if !valid {
                            report.invalid += 1;
                        }
                    } else {
                        report.stale += 1;
                    }
                }
            }
        }

        debug!(
            written = report.written,
            stale = report.stale,
            invalid = report.invalid,
            skipped = report.skipped,
            "Fragments stored"
        );
        Ok(report)
    }

    async fn store_fragment(&self, raw: &[u8], outcome: &DecodeOutcome) -> Result<Stored> {
        let Some(legacy_id) = outcome.legacy_id() else {
            warn!(
                error = outcome.error.as_deref().unwrap_or("no control number"),
                "Skipping fragment without legacy id"
            );
            return Ok(Stored::Skipped);
        };

        let source_timestamp = outcome
            .record
            .modified
            .as_deref()
            .and_then(parse_legacy_timestamp)
            .unwrap_or_else(Utc::now);
        let collection = outcome.collection();
        let entry = MirrorUpsert {
            legacy_id,
            raw_payload: raw,
            decoded: Some(&outcome.record),
            valid: outcome.valid,
            collection: collection.as_deref(),
            error: outcome.error.as_deref(),
            source_timestamp,
        };

        let written = retry_on_lock("mirror upsert", self.config.migration.lock_wait_ms, || {
            mirror::upsert(&self.db, &entry)
        })
        .await?;

        if !outcome.valid {
            debug!(legacy_id, error = ?outcome.error, "Stored invalid fragment");
        }
        Ok(Stored::Kept {
            legacy_id,
            written,
            valid: outcome.valid,
        })
    }
}

fn internal(message: String) -> MigrationError {
    MigrationError::Common(hepm_common::Error::Internal(message))
}
