//! Local REST API against a running pipeline.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use homebound_agent::api::create_router;
use homebound_core::{PersistedState, SettingsStore};
use serde_json::{json, Value};
use tempfile::TempDir;

fn server(dir: &TempDir) -> (TestServer, common::Harness) {
    let harness = common::start(dir.path(), None, PersistedState::default());
    let server = TestServer::new(create_router(harness.pipeline.state())).unwrap();
    (server, harness)
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = TempDir::new().unwrap();
    let (server, _harness) = server(&dir);

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    // No radio in the harness, so neither proximity role goes live.
    assert_eq!(body["proximity"], false);
    assert!(body["components"]["sampler"].is_string());
}

#[tokio::test]
async fn quarantine_lifecycle() {
    let dir = TempDir::new().unwrap();
    let (server, harness) = server(&dir);

    let response = server.delete("/api/quarantine").await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "QUARANTINE_INACTIVE");

    let response = server
        .post("/api/quarantine")
        .json(&json!({"latitude": 48.145_842, "longitude": 17.126_651, "radius": 0.0}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "INVALID_ZONE");

    // Radius falls back to desiredPositionAccuracy.
    let response = server
        .post("/api/quarantine")
        .json(&json!({"latitude": 48.145_842, "longitude": 17.126_651}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["active"], true);
    assert_eq!(body["zone"]["radius"], 100.0);

    let stored = harness.settings.load().unwrap();
    assert!(stored.quarantine_active);
    assert!(stored.quarantine_zone.is_some());

    let status: Value = server.get("/api/status").await.json();
    assert_eq!(status["reporting"]["quarantine_active"], true);
    assert_eq!(status["reporting"]["pending_locations"], 0);
    assert!(status["components"].is_object());

    let response = server.delete("/api/quarantine").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["active"], false);
    assert_eq!(body["flush"]["result"], "empty");

    assert!(!harness.settings.load().unwrap().quarantine_active);
}

#[tokio::test]
async fn identity_is_seeded_on_start() {
    let dir = TempDir::new().unwrap();
    let (_server, harness) = server(&dir);

    let stored = harness.settings.load().unwrap();
    assert!(!stored.device_id.is_empty());
    assert_eq!(stored.profile_id.map(|id| id.0), Some(7));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let dir = TempDir::new().unwrap();
    let (server, _harness) = server(&dir);

    let response = server.get("/api/openapi.json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["paths"]["/api/status"].is_object());
}
