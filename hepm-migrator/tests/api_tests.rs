//! Health server tests
//!
//! Requests go straight through the router with `tower::ServiceExt::oneshot`.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hepm_common::events::EventBus;
use hepm_migrator::indexer::InMemoryIndex;
use hepm_migrator::{build_router, AppState, Migrator, RunOptions};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let response = build_router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// State plus a migrator sharing its event bus, after one full run
async fn migrated_state() -> (tempfile::TempDir, AppState) {
    let (dir, pool) = create_test_db().await.unwrap();
    let bus = EventBus::new(100);
    let state = AppState::new(pool.clone(), bus.clone());
    state.spawn_event_bridge();

    let index = Arc::new(InMemoryIndex::new(pool.clone()));
    let migrator = Migrator::new(pool, test_config(&dir), index, bus);
    let dump = write_dump(dir.path(), "dump.xml", &standard_dump());
    migrator.run_full(&dump, &RunOptions::default()).await.unwrap();

    (dir, state)
}

#[tokio::test]
async fn test_health_reports_ok_on_fresh_state() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let state = AppState::new(pool, EventBus::new(100));

    let (status, body) = get_json(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "hepm-migrator");
    assert_eq!(body["migrated"], 0);
    assert_eq!(body["broken"], 0);
    assert!(body.get("last_cycle_at").is_none() || body["last_cycle_at"].is_null());
    assert_eq!(body["mirror"]["pending"], 0);
    assert_eq!(body["mirror"]["sync_pending"], 0);
}

#[tokio::test]
async fn test_health_counts_follow_migration_events() {
    let (_dir, state) = migrated_state().await;

    let mut body = Value::Null;
    for _ in 0..50 {
        let (_, current) = get_json(&state, "/health").await;
        body = current;
        if body["migrated"] == 3 && body["broken"] == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(body["migrated"], 3);
    assert_eq!(body["broken"], 1);
    assert!(body["last_error"].as_str().unwrap().contains("668"));
}

#[tokio::test]
async fn test_health_reports_mirror_status_breakdown() {
    let (_dir, state) = migrated_state().await;

    let (status, body) = get_json(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mirror"]["pending"], 0);
    assert_eq!(body["mirror"]["migrated"], 3);
    assert_eq!(body["mirror"]["broken"], 1);
    assert_eq!(body["mirror"]["sync_pending"], 0);
}

#[tokio::test]
async fn test_health_is_degraded_when_database_is_closed() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let state = AppState::new(pool.clone(), EventBus::new(100));
    pool.close().await;

    let (status, body) = get_json(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert!(body.get("mirror").is_none());
}

#[tokio::test]
async fn test_resolve_known_and_unknown_identifiers() {
    let (_dir, state) = migrated_state().await;
    let record = literature(&state.db, 666).await;

    let (status, body) = get_json(&state, "/resolve/lit/666").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], record.uuid.to_string());
    assert_eq!(body["terminal"], "lit:666");
    assert_eq!(body["hops"], 0);

    let (status, body) = get_json(&state, "/resolve/lit/668").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_broken_rows_are_listed() {
    let (_dir, state) = migrated_state().await;

    let (status, body) = get_json(&state, "/mirror/broken").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["legacy_id"], 668);
    assert!(rows[0]["error"].as_str().unwrap().contains("260__c"));
}
