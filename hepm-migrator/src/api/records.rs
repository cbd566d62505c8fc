//! Read-only lookups: identifier resolution and broken mirror rows

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::db::mirror;
use crate::error::{ApiError, ApiResult};
use crate::identifiers::IdentifierManager;
use crate::model::PidKey;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub pid_type: String,
    pub pid_value: String,
    pub uuid: Uuid,
    /// Terminal identifier after following redirects
    pub terminal: String,
    pub hops: usize,
}

#[derive(Debug, Serialize)]
pub struct BrokenRow {
    pub legacy_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /resolve/:pid_type/:pid_value
pub async fn resolve_pid(
    State(state): State<AppState>,
    Path((pid_type, pid_value)): Path<(String, String)>,
) -> ApiResult<Json<ResolveResponse>> {
    if pid_type.is_empty() || pid_value.is_empty() {
        return Err(ApiError::BadRequest("pid type and value are required".to_string()));
    }

    let key = PidKey::new(pid_type.as_str(), pid_value.as_str());
    let mut conn = state
        .db
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // Resolution never writes, so the redirection flag does not matter here
    let resolved = IdentifierManager::new(true).resolve_terminal(&mut conn, &key).await?;

    Ok(Json(ResolveResponse {
        pid_type,
        pid_value,
        uuid: resolved.uuid,
        terminal: resolved.key.to_string(),
        hops: resolved.hops,
    }))
}

/// GET /mirror/broken
pub async fn list_broken(State(state): State<AppState>) -> ApiResult<Json<Vec<BrokenRow>>> {
    let rows = mirror::list_broken(&state.db).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(legacy_id, error)| BrokenRow { legacy_id, error })
            .collect(),
    ))
}

pub fn record_routes() -> Router<AppState> {
    Router::new()
        .route("/resolve/:pid_type/:pid_value", get(resolve_pid))
        .route("/mirror/broken", get(list_broken))
}
