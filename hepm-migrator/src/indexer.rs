//! Search indexing collaborator
//!
//! The pipeline only asks to (re)index ids and to remove ids. Delivery is
//! at-least-once; implementations must treat repeated requests as no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::records;
use crate::error::{MigrationError, Result};

const USER_AGENT: &str = concat!("hepm-migrator/", env!("CARGO_PKG_VERSION"));

/// Indexing collaborator contract
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// (Re)index the current content of `ids`
    async fn index(&self, ids: &[Uuid]) -> Result<()>;

    /// Remove `ids` from the index
    async fn delete(&self, ids: &[Uuid]) -> Result<()>;
}

/// Indexer that only logs, used when no index url is configured
#[derive(Debug, Default)]
pub struct LoggingIndexer;

#[async_trait]
impl SearchIndexer for LoggingIndexer {
    async fn index(&self, ids: &[Uuid]) -> Result<()> {
        info!(count = ids.len(), "Index request");
        Ok(())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        info!(count = ids.len(), "Index removal request");
        Ok(())
    }
}

/// Posts id lists to `<url>/index` and `<url>/delete`
pub struct HttpIndexer {
    http_client: reqwest::Client,
    url: String,
}

impl HttpIndexer {
    pub fn new(url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MigrationError::Upstream(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, action: &str, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}/{}", self.url, action);
        debug!(url = %url, count = ids.len(), "Posting to indexer");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "ids": ids }))
            .send()
            .await
            .map_err(|e| MigrationError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MigrationError::Upstream(format!(
                "indexer answered {} to {}: {}",
                status, action, error_text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndexer for HttpIndexer {
    async fn index(&self, ids: &[Uuid]) -> Result<()> {
        self.post("index", ids).await
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        self.post("delete", ids).await
    }
}

/// In-process index snapshotting record bodies, with read-back
pub struct InMemoryIndex {
    pool: SqlitePool,
    documents: RwLock<HashMap<Uuid, Value>>,
    requests: Mutex<Vec<IndexRequest>>,
}

/// One request received by [`InMemoryIndex`]
#[derive(Debug, Clone, PartialEq)]
pub enum IndexRequest {
    Index(Vec<Uuid>),
    Delete(Vec<Uuid>),
}

impl InMemoryIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            documents: RwLock::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Indexed document for `uuid`
    pub async fn get(&self, uuid: Uuid) -> Option<Value> {
        self.documents.read().await.get(&uuid).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Requests received so far, oldest first
    pub async fn requests(&self) -> Vec<IndexRequest> {
        self.requests.lock().await.clone()
    }

    /// Every id named in an index request, in arrival order
    pub async fn indexed_ids(&self) -> Vec<Uuid> {
        self.requests
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                IndexRequest::Index(ids) => Some(ids.clone()),
                IndexRequest::Delete(_) => None,
            })
            .flatten()
            .collect()
    }

    pub async fn clear_requests(&self) {
        self.requests.lock().await.clear();
    }
}

#[async_trait]
impl SearchIndexer for InMemoryIndex {
    async fn index(&self, ids: &[Uuid]) -> Result<()> {
        self.requests.lock().await.push(IndexRequest::Index(ids.to_vec()));
        for uuid in ids {
            match records::get(&self.pool, *uuid).await? {
                Some(record) => {
                    self.documents.write().await.insert(*uuid, record.json_body);
                }
                None => {
                    self.documents.write().await.remove(uuid);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        self.requests.lock().await.push(IndexRequest::Delete(ids.to_vec()));
        let mut documents = self.documents.write().await;
        for uuid in ids {
            documents.remove(uuid);
        }
        Ok(())
    }
}

/// When an [`IndexBatch`] forwards requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Forward each request straight away
    Immediate,
    /// Accumulate until [`IndexBatch::flush`]
    Deferred,
}

/// Counts of ids handed to the indexer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub indexed: usize,
    pub removed: usize,
}

#[derive(Default)]
struct Pending {
    index: Vec<Uuid>,
    delete: Vec<Uuid>,
}

/// Batch context in front of a [`SearchIndexer`]
///
/// In deferred mode ids are de-duplicated in first-seen order; a later
/// request for the same id in the other list wins.
pub struct IndexBatch {
    indexer: Arc<dyn SearchIndexer>,
    mode: BatchMode,
    pending: Mutex<Pending>,
}

impl IndexBatch {
    pub fn new(indexer: Arc<dyn SearchIndexer>, mode: BatchMode) -> Self {
        Self {
            indexer,
            mode,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn immediate(indexer: Arc<dyn SearchIndexer>) -> Self {
        Self::new(indexer, BatchMode::Immediate)
    }

    pub fn deferred(indexer: Arc<dyn SearchIndexer>) -> Self {
        Self::new(indexer, BatchMode::Deferred)
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    pub async fn index(&self, ids: &[Uuid]) -> Result<()> {
        match self.mode {
            BatchMode::Immediate => self.indexer.index(ids).await,
            BatchMode::Deferred => {
                let mut pending = self.pending.lock().await;
                for uuid in ids {
                    pending.delete.retain(|d| d != uuid);
                    if !pending.index.contains(uuid) {
                        pending.index.push(*uuid);
                    }
                }
                Ok(())
            }
        }
    }

    pub async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        match self.mode {
            BatchMode::Immediate => self.indexer.delete(ids).await,
            BatchMode::Deferred => {
                let mut pending = self.pending.lock().await;
                for uuid in ids {
                    pending.index.retain(|i| i != uuid);
                    if !pending.delete.contains(uuid) {
                        pending.delete.push(*uuid);
                    }
                }
                Ok(())
            }
        }
    }

    /// Route ids by record state: live records are indexed, deleted or
    /// missing ones removed
    pub async fn publish(&self, pool: &SqlitePool, ids: &[Uuid]) -> Result<FlushReport> {
        let mut live = Vec::new();
        let mut gone = Vec::new();
        for uuid in ids {
            match records::get(pool, *uuid).await? {
                Some(record) if !record.deleted => live.push(*uuid),
                _ => gone.push(*uuid),
            }
        }

        if !live.is_empty() {
            self.index(&live).await?;
        }
        if !gone.is_empty() {
            self.delete(&gone).await?;
        }
        Ok(FlushReport {
            indexed: live.len(),
            removed: gone.len(),
        })
    }

    /// Forward everything accumulated; a no-op in immediate mode
    pub async fn flush(&self) -> Result<FlushReport> {
        let Pending { index, delete } = std::mem::take(&mut *self.pending.lock().await);

        if !index.is_empty() {
            self.indexer.index(&index).await?;
        }
        if !delete.is_empty() {
            self.indexer.delete(&delete).await?;
        }
        if !index.is_empty() || !delete.is_empty() {
            debug!(indexed = index.len(), removed = delete.len(), "Index batch flushed");
        }
        Ok(FlushReport {
            indexed: index.len(),
            removed: delete.len(),
        })
    }

    pub async fn pending(&self) -> usize {
        let pending = self.pending.lock().await;
        pending.index.len() + pending.delete.len()
    }
}
