//! Health check endpoint
//!
//! Reports uptime, last continuous-mode cycle, cumulative counts and the
//! current mirror status breakdown.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::db::{mirror, records};
use crate::model::MigratedStatus;
use crate::AppState;

/// Mirror rows per migration status, read from the database
#[derive(Debug, Default, Serialize)]
pub struct MirrorCounts {
    pub pending: i64,
    pub migrated: i64,
    pub broken: i64,
    /// Records waiting for relation synchronization
    pub sync_pending: i64,
}

impl MirrorCounts {
    async fn load(db: &sqlx::SqlitePool) -> crate::error::Result<Self> {
        let mut counts = MirrorCounts::default();
        for (status, n) in mirror::count_by_status(db).await? {
            match status {
                MigratedStatus::Pending => counts.pending = n,
                MigratedStatus::Migrated => counts.migrated = n,
                MigratedStatus::Broken => counts.broken = n,
            }
        }
        counts.sync_pending = records::pending_sync(db).await?.len() as i64;
        Ok(counts)
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded")
    pub status: String,
    /// Module name ("hepm-migrator")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git hash captured at build time
    pub git_hash: String,
    pub build_timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Completion time of the last continuous-mode cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub migrated: u64,
    pub broken: u64,
    /// Absent when the database could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<MirrorCounts>,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let stats = state.stats.read().await.clone();
    let mirror = match MirrorCounts::load(&state.db).await {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!(error = %e, "Mirror counts unavailable");
            None
        }
    };
    let status = if state.db.is_closed() || mirror.is_none() { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "hepm-migrator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds,
        last_cycle_at: stats.last_cycle_at,
        cycles: stats.cycles,
        migrated: stats.migrated,
        broken: stats.broken,
        mirror,
        last_error: stats.last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
