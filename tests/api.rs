//! Integration tests for the HTTP API.
//!
//! Builds the real axum router over a temporary data directory and drives it
//! with `tower::ServiceExt::oneshot` (no TCP listener needed).

use std::sync::Arc;

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use tenant_proxy::config::Config;
use tenant_proxy::proxy::{create_router, AppState, REQUEST_ID_HEADER};
use tenant_proxy::TenantStore;

/// Build a router whose tenants live under a fresh temp directory.
fn setup_test_app() -> (axum::Router, Arc<TenantStore>, TempDir) {
    setup_test_app_with(|_| {})
}

fn setup_test_app_with(
    configure: impl FnOnce(&mut Config),
) -> (axum::Router, Arc<TenantStore>, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");

    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    configure(&mut config);

    let store = Arc::new(
        TenantStore::from_config(&config.storage, &config.queue).expect("store from config"),
    );
    let app = create_router(AppState::new(store.clone(), Arc::new(config)));
    (app, store, dir)
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn create_schema(app: &axum::Router, tenant: &str) {
    let (status, _) = post_json(
        app,
        "/transaction",
        json!({
            "tenantId": tenant,
            "queries": [
                {"query": "CREATE TABLE boards (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"},
                {"query": "CREATE TABLE tasks (id INTEGER PRIMARY KEY, board_id INTEGER NOT NULL REFERENCES boards(id), title TEXT NOT NULL, position INTEGER NOT NULL)"},
                {"query": "INSERT INTO boards (id, name) VALUES (1, 'Sprint')"},
                {"query": "INSERT INTO tasks (board_id, title, position) VALUES (1, 'a', 1), (1, 'b', 2), (1, 'c', 3)"}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_ok() {
    let (app, store, _dir) = setup_test_app();

    let (status, json) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["lifecycle"], "running");
    assert_eq!(store.pool().len(), 0, "health must not open tenant databases");
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let (app, _store, _dir) = setup_test_app();

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let header = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .expect("request id header");
    assert_eq!(header.to_str().unwrap().len(), 36);
}

// ============================================================================
// /query
// ============================================================================

#[tokio::test]
async fn test_query_exec_and_fetch() {
    let (app, _store, _dir) = setup_test_app();
    create_schema(&app, "acme").await;

    let (status, json) = post_json(
        &app,
        "/query",
        json!({
            "tenantId": "acme",
            "query": "INSERT INTO tasks (board_id, title, position) VALUES (?, ?, ?)",
            "params": [1, "d", 4]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["kind"], "exec");
    assert_eq!(json["result"]["rowsAffected"], 1);
    assert_eq!(json["result"]["lastInsertId"], 4);

    let (status, json) = post_json(
        &app,
        "/query",
        json!({
            "tenantId": "acme",
            "query": "SELECT title FROM tasks ORDER BY position",
            "params": []
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["kind"], "rows");
    let titles: Vec<&str> = json["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, ["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_query_fetch_one_missing_row_is_null() {
    let (app, _store, _dir) = setup_test_app();
    create_schema(&app, "acme").await;

    let (status, json) = post_json(
        &app,
        "/query",
        json!({
            "tenantId": "acme",
            "query": "SELECT * FROM tasks WHERE id = ?",
            "params": [999],
            "kind": "row"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"kind": "row", "result": null}));
}

#[tokio::test]
async fn test_query_database_error_envelope() {
    let (app, _store, _dir) = setup_test_app();

    let (status, json) = post_json(
        &app,
        "/query",
        json!({"tenantId": "acme", "query": "SELECT * FROM no_such_table"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["kind"], "database");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("no_such_table"));
}

#[tokio::test]
async fn test_tenants_are_isolated_files() {
    let (app, _store, dir) = setup_test_app();
    create_schema(&app, "alpha").await;

    let (status, json) = post_json(
        &app,
        "/query",
        json!({"tenantId": "beta", "query": "SELECT * FROM tasks"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{json}");

    assert!(dir.path().join("alpha").join("tenant.db").exists());
    assert!(dir.path().join("beta").join("tenant.db").exists());
}

// ============================================================================
// Client errors
// ============================================================================

#[tokio::test]
async fn test_empty_tenant_id_rejected_without_touching_disk() {
    let (app, store, dir) = setup_test_app();

    let (status, json) = post_json(
        &app,
        "/query",
        json!({"tenantId": "", "query": "SELECT 1", "params": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "client");

    assert_eq!(store.pool().len(), 0);
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 0, "no directory or file may be created");
}

#[tokio::test]
async fn test_path_traversal_tenant_rejected() {
    let (app, _store, dir) = setup_test_app();

    let (status, _) = post_json(
        &app,
        "/query",
        json!({"tenantId": "../outside", "query": "SELECT 1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_client_error() {
    let (app, _store, _dir) = setup_test_app();

    let request = Request::post("/query")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "client");
}

#[tokio::test]
async fn test_oversized_body_is_payload_too_large() {
    let (app, store, _dir) = setup_test_app_with(|config| config.server.max_body_bytes = 64);

    let (status, json) = post_json(
        &app,
        "/query",
        json!({"tenantId": "acme", "query": format!("SELECT '{}'", "x".repeat(256))}),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["error"]["kind"], "client");
    assert_eq!(store.pool().len(), 0);
}

#[tokio::test]
async fn test_missing_content_type_is_unsupported_media_type() {
    let (app, _store, _dir) = setup_test_app();

    let request = Request::post("/query")
        .body(Body::from(json!({"tenantId": "acme", "query": "SELECT 1"}).to_string()))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json["error"]["kind"], "client");
}

#[tokio::test]
async fn test_wrong_field_type_is_bad_request() {
    let (app, _store, _dir) = setup_test_app();

    let (status, json) =
        post_json(&app, "/query", json!({"tenantId": 7, "query": "SELECT 1"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "client");
}

#[tokio::test]
async fn test_transaction_control_statement_is_client_error() {
    let (app, _store, _dir) = setup_test_app();
    create_schema(&app, "acme").await;

    let (status, json) =
        post_json(&app, "/query", json!({"tenantId": "acme", "query": "BEGIN"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "client");

    // The tenant's transactions are unaffected.
    let (status, _) = post_json(
        &app,
        "/transaction",
        json!({
            "tenantId": "acme",
            "queries": [{"query": "UPDATE tasks SET position = position + 1"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_resource_error_then_successful_retry() {
    let (app, store, dir) = setup_test_app();

    // A plain file where the tenant directory belongs makes the open fail.
    let blocker = dir.path().join("acme");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let body = json!({"tenantId": "acme", "query": "SELECT 1 AS one"});
    let (status, json) = post_json(&app, "/query", body.clone()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["kind"], "resource");
    assert_eq!(store.pool().len(), 0);

    std::fs::remove_file(&blocker).unwrap();

    let (status, json) = post_json(&app, "/query", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"][0]["one"], 1);
    assert_eq!(store.pool().len(), 1);
}

#[tokio::test]
async fn test_unknown_kind_is_client_error() {
    let (app, store, _dir) = setup_test_app();

    let (status, json) = post_json(
        &app,
        "/query",
        json!({"tenantId": "acme", "query": "SELECT 1", "kind": "cursor"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"].as_str().unwrap().contains("cursor"));
    assert_eq!(store.pool().len(), 0);
}

// ============================================================================
// /transaction
// ============================================================================

#[tokio::test]
async fn test_transaction_returns_ordered_results() {
    let (app, _store, _dir) = setup_test_app();
    create_schema(&app, "acme").await;

    let (status, json) = post_json(
        &app,
        "/transaction",
        json!({
            "tenantId": "acme",
            "queries": [
                {"query": "UPDATE tasks SET position = ? WHERE title = ?", "params": [3, "a"]},
                {"query": "UPDATE tasks SET position = ? WHERE title = ?", "params": [1, "c"]},
                {"query": "SELECT title FROM tasks ORDER BY position", "kind": "rows"}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["kind"], "exec");
    assert_eq!(results[0]["result"]["rowsAffected"], 1);
    assert_eq!(results[2]["result"][0]["title"], "c");
}

#[tokio::test]
async fn test_transaction_failure_rolls_back() {
    let (app, _store, _dir) = setup_test_app();
    create_schema(&app, "acme").await;

    let (status, json) = post_json(
        &app,
        "/transaction",
        json!({
            "tenantId": "acme",
            "queries": [
                {"query": "UPDATE tasks SET position = 10 WHERE title = 'a'"},
                {"query": "UPDATE tasks SET position = 20 WHERE title = 'b'"},
                {"query": "UPDATE tasks SET board_id = ? WHERE title = 'c'", "params": [404]}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["kind"], "transaction");
    assert_eq!(json["error"]["statementIndex"], 2);
    assert_eq!(json["error"]["rolledBack"], true);

    let (_, json) = post_json(
        &app,
        "/query",
        json!({"tenantId": "acme", "query": "SELECT title, position FROM tasks ORDER BY id"}),
    )
    .await;
    assert_eq!(
        json["result"],
        json!([
            {"title": "a", "position": 1},
            {"title": "b", "position": 2},
            {"title": "c", "position": 3}
        ])
    );
}

#[tokio::test]
async fn test_empty_transaction_is_client_error() {
    let (app, store, _dir) = setup_test_app();

    let (status, json) = post_json(
        &app,
        "/transaction",
        json!({"tenantId": "acme", "queries": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "client");
    assert_eq!(store.pool().len(), 0);
}

// ============================================================================
// /info
// ============================================================================

#[tokio::test]
async fn test_info_creates_handle_and_reports_settings() {
    let (app, store, dir) = setup_test_app();

    let (status, json) = get(&app, "/info/fresh-tenant").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tenantId"], "fresh-tenant");
    assert_eq!(json["journalMode"], "wal");
    assert_eq!(json["synchronous"], "normal");
    assert_eq!(json["busyTimeoutMs"], 5000);
    assert_eq!(json["foreignKeys"], true);
    assert_eq!(json["queuedJobs"], 0);
    assert!(dir.path().join("fresh-tenant").join("tenant.db").exists());
    assert_eq!(store.pool().len(), 1);
}

#[tokio::test]
async fn test_info_concurrent_first_reference() {
    let (app, store, dir) = setup_test_app();

    let calls = (0..20).map(|_| {
        let app = app.clone();
        async move { get(&app, "/info/newcomer").await }
    });
    let responses = futures::future::join_all(calls).await;

    for (status, json) in &responses {
        assert_eq!(*status, StatusCode::OK, "{json}");
    }
    let opened: Vec<&str> = responses
        .iter()
        .map(|(_, json)| json["openedAt"].as_str().unwrap())
        .collect();
    assert!(
        opened.windows(2).all(|w| w[0] == w[1]),
        "all callers must see the same handle"
    );
    assert_eq!(store.pool().len(), 1);

    let db_files = std::fs::read_dir(dir.path().join("newcomer"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() == "tenant.db")
        .count();
    assert_eq!(db_files, 1);
}

#[tokio::test]
async fn test_info_invalid_tenant() {
    let (app, _store, _dir) = setup_test_app();

    let (status, json) = get(&app, "/info/Not_Valid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "client");
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_requests_after_shutdown_are_refused() {
    let (app, store, _dir) = setup_test_app();
    create_schema(&app, "acme").await;

    store.shutdown().await;

    let (status, json) = post_json(
        &app,
        "/query",
        json!({"tenantId": "acme", "query": "SELECT 1"}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["kind"], "shutting_down");

    let (status, json) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["lifecycle"], "stopped");
}
