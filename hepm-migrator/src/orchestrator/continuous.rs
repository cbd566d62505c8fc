//! Continuous mode
//!
//! One cycle: touch the liveness file, ingest any dumps waiting in the drop
//! directory, migrate pending mirror rows, republish what changed. The
//! cancellation token is only honoured between cycles.

use std::path::{Path, PathBuf};

use chrono::Utc;
use hepm_common::events::MigrationEvent;
use hepm_common::time::millis_to_duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{IngestReport, Migrator, RunReport};
use crate::error::{MigrationError, Result};
use crate::model::SelectionMode;

const DONE_DIR: &str = "done";
const FAILED_DIR: &str = "failed";

impl Migrator {
    /// Run cycles until `cancel` fires; returns the number of cycles run
    pub async fn run_continuously(&self, cancel: CancellationToken) -> Result<u64> {
        let interval = millis_to_duration(self.config.migration.polling_interval_ms);
        info!(
            polling_interval_ms = self.config.migration.polling_interval_ms,
            lastrun_file = %self.config.migration.lastrun_file.display(),
            "Continuous migration started"
        );

        let mut cycles = 0u64;
        while !cancel.is_cancelled() {
            if let Err(e) = touch_file(&self.config.migration.lastrun_file).await {
                warn!(error = %e, "Failed to touch liveness file");
            }

            cycles += 1;
            let (migrated, broken) = match self.run_cycle().await {
                Ok(report) => (report.migrated(), report.broken()),
                Err(e) => {
                    error!(cycle = cycles, error = %e, "Migration cycle failed");
                    (0, 0)
                }
            };
            self.event_bus.emit_lossy(MigrationEvent::CycleCompleted {
                cycle: cycles,
                migrated,
                broken,
                timestamp: Utc::now(),
            });

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(cycles, "Continuous migration stopped");
        Ok(cycles)
    }

    /// One continuous-mode cycle
    pub async fn run_cycle(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        if let Some(dir) = self.config.migration.drop_dir.clone() {
            report.ingest = Some(self.ingest_drop_dir(&dir).await?);
        }

        let migrate = self.migrate_rows(SelectionMode::Default, None, None).await?;
        report.reindex = Some(self.reindex(Some(&migrate.affected())).await?);
        report.migrate = Some(migrate);
        Ok(report)
    }

    /// Ingest every file waiting in `dir`, moving each to `done/` or `failed/`
    async fn ingest_drop_dir(&self, dir: &Path) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for path in pending_files(dir).await? {
            match self.ingest_file(&path).await {
                Ok(ingested) => {
                    report.merge(ingested);
                    move_into(&path, &dir.join(DONE_DIR)).await?;
                }
                Err(e @ MigrationError::Io(_)) => {
                    warn!(path = %path.display(), error = %e, "Unreadable legacy dump");
                    move_into(&path, &dir.join(FAILED_DIR)).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}

/// Write the current time to `path`, creating parent directories
pub async fn touch_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, Utc::now().to_rfc3339()).await
}

/// Regular, non-hidden files of `dir`, sorted by name
async fn pending_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

async fn move_into(path: &Path, dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    if let Some(name) = path.file_name() {
        tokio::fs::rename(path, dir.join(name)).await?;
    }
    Ok(())
}
