//! Step 3: republish records to the indexing collaborator

use futures::stream::{self, TryStreamExt};
use hepm_common::events::PipelineStep;
use tracing::info;
use uuid::Uuid;

use super::{Migrator, ReindexReport};
use crate::db::records;
use crate::error::{MigrationError, Result};
use crate::indexer::IndexBatch;

impl Migrator {
    /// Republish `ids`, or every record when `None`
    ///
    /// Live records are indexed and deleted ones removed. Indexer failures
    /// fail the step; re-running it is safe.
    pub async fn reindex(&self, ids: Option<&[Uuid]>) -> Result<ReindexReport> {
        self.step_started(PipelineStep::Reindex);

        let ids = match ids {
            Some(ids) => ids.to_vec(),
            None => records::all_uuids(&self.db).await?,
        };

        let batch = IndexBatch::deferred(self.indexer.clone());
        let chunk_size = self.config.migration.chunk_size.max(1);
        stream::iter(ids.chunks(chunk_size).map(Ok::<_, MigrationError>))
            .try_for_each_concurrent(self.config.worker_count(), |chunk| {
                let batch = &batch;
                async move { batch.publish(&self.db, chunk).await.map(|_| ()) }
            })
            .await?;
        let flushed = batch.flush().await?;

        let report = ReindexReport {
            indexed: flushed.indexed,
            removed: flushed.removed,
        };
        info!(indexed = report.indexed, removed = report.removed, "Records republished");
        self.step_completed(PipelineStep::Reindex, ids.len(), 0, 0, 0);
        Ok(report)
    }
}
