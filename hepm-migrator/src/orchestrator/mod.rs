//! Migration orchestrator
//!
//! Drives the three-step pipeline:
//!
//! 1. **Ingest** (`phase_ingest`): decode legacy fragments into the mirror
//! 2. **Migrate** (`phase_migrate`): transform, assign identifiers, persist,
//!    then synchronize relations for the touched records
//! 3. **Reindex** (`phase_reindex`): republish records to the indexer
//!
//! Steps run individually or chained; the continuous loop lives in
//! `continuous`.

mod continuous;
mod phase_ingest;
mod phase_migrate;
mod phase_reindex;
pub mod statistics;

pub use continuous::touch_file;
pub use statistics::{IngestReport, MigrateReport, ReindexReport, RunReport};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hepm_common::events::{EventBus, MigrationEvent, PipelineStep};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::MigratorConfig;
use crate::error::{MigrationError, Result};
use crate::identifiers::IdentifierManager;
use crate::indexer::{HttpIndexer, LoggingIndexer, SearchIndexer};
use crate::model::SelectionMode;
use crate::relations::RelationSynchronizer;
use crate::transform::Transformer;

/// Selection for step 2 and the input for step 1
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: SelectionMode,
    pub date_from: Option<DateTime<Utc>>,
    /// Legacy dump for step 1
    pub input: Option<PathBuf>,
}

/// Pipeline driver
pub struct Migrator {
    db: SqlitePool,
    event_bus: EventBus,
    config: Arc<MigratorConfig>,
    identifiers: IdentifierManager,
    transformer: Transformer,
    synchronizer: RelationSynchronizer,
    indexer: Arc<dyn SearchIndexer>,
}

impl Migrator {
    pub fn new(
        db: SqlitePool,
        config: MigratorConfig,
        indexer: Arc<dyn SearchIndexer>,
        event_bus: EventBus,
    ) -> Self {
        let identifiers = IdentifierManager::new(config.features.enable_pid_redirection);
        let transformer = Transformer::new(&config.records_base_url, identifiers);
        let synchronizer = RelationSynchronizer::new(db.clone(), &config, identifiers);

        Self {
            db,
            event_bus,
            config: Arc::new(config),
            identifiers,
            transformer,
            synchronizer,
            indexer,
        }
    }

    /// Build with the indexer named by `[indexer] url` (log-only when absent)
    pub fn from_config(db: SqlitePool, config: MigratorConfig, event_bus: EventBus) -> Result<Self> {
        let indexer: Arc<dyn SearchIndexer> = match &config.indexer.url {
            Some(url) => {
                info!(url = %url, "Using HTTP indexer");
                Arc::new(HttpIndexer::new(url)?)
            }
            None => Arc::new(LoggingIndexer),
        };
        Ok(Self::new(db, config, indexer, event_bus))
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn identifiers(&self) -> IdentifierManager {
        self.identifiers
    }

    pub fn synchronizer(&self) -> &RelationSynchronizer {
        &self.synchronizer
    }

    pub fn indexer(&self) -> Arc<dyn SearchIndexer> {
        self.indexer.clone()
    }

    /// Run a single step
    pub async fn run_step(&self, step: PipelineStep, options: &RunOptions) -> Result<RunReport> {
        let mut report = RunReport::default();
        match step {
            PipelineStep::Ingest => {
                let input = options.input.as_deref().ok_or_else(|| {
                    MigrationError::Common(hepm_common::Error::InvalidInput(
                        "step 1 needs an input file".to_string(),
                    ))
                })?;
                report.ingest = Some(self.ingest_file(input).await?);
            }
            PipelineStep::Migrate => {
                report.migrate = Some(self.migrate_from_mirror(options.mode, options.date_from).await?);
            }
            PipelineStep::Reindex => {
                report.reindex = Some(self.reindex(None).await?);
            }
        }
        Ok(report)
    }

    /// Steps 1 → 2 → 3 for one input file
    ///
    /// Step 2 only considers the rows step 1 produced; step 3 republishes
    /// the records step 2 touched.
    pub async fn run_full(&self, input: &Path, options: &RunOptions) -> Result<RunReport> {
        let ingest = self.ingest_file(input).await?;
        let migrate = self
            .migrate_legacy_ids(&ingest.legacy_ids, options.mode, options.date_from)
            .await?;
        let reindex = self.reindex(Some(&migrate.affected())).await?;

        let report = RunReport {
            ingest: Some(ingest),
            migrate: Some(migrate),
            reindex: Some(reindex),
        };
        info!(summary = %report.summary(), "Full migration finished");
        Ok(report)
    }

    fn step_started(&self, step: PipelineStep) {
        info!(step = %step, "Step started");
        self.event_bus.emit_lossy(MigrationEvent::StepStarted {
            step,
            timestamp: Utc::now(),
        });
    }

    fn step_completed(&self, step: PipelineStep, processed: usize, migrated: usize, broken: usize, skipped: usize) {
        info!(step = %step, processed, migrated, broken, skipped, "Step completed");
        self.event_bus.emit_lossy(MigrationEvent::StepCompleted {
            step,
            processed,
            migrated,
            broken,
            skipped,
            timestamp: Utc::now(),
        });
    }
}
