//! hepm-migrator library interface
//!
//! Migrates legacy MARCXML records into the JSON record store through a
//! three-step pipeline (ingest → migrate → reindex) and keeps identifiers,
//! citation edges and entity links consistent along the way.

pub mod api;
pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod event_bridge;
pub mod identifiers;
pub mod importer;
pub mod indexer;
pub mod model;
pub mod orchestrator;
pub mod relations;
pub mod transform;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, MigrationError};
pub use crate::orchestrator::{Migrator, RunOptions, RunReport};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use hepm_common::events::EventBus;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::event_bridge::MigrationStats;

/// State shared by the health server
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Counters maintained by the event bridge
    pub stats: Arc<RwLock<MigrationStats>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            startup_time: Utc::now(),
            stats: Arc::new(RwLock::new(MigrationStats::default())),
        }
    }

    /// Spawn the bridge keeping `stats` in step with the event bus
    pub fn spawn_event_bridge(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(event_bridge::run_event_bridge(
            self.event_bus.subscribe(),
            self.stats.clone(),
        ))
    }
}

/// Build the health server router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::record_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
