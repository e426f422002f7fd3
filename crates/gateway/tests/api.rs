//! API surface tests over in-memory state: no browser, no network.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use {
    axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
    },
    http_body_util::BodyExt,
    tower::ServiceExt,
    vision_browser::BrowserRegistry,
    vision_gateway::{AppState, build_router},
    vision_llm::{LlmResolver, ProviderFactory, ProviderKeys},
    vision_pipeline::{CompareEngine, RecordingJobQueue, RunOrchestrator},
    vision_store::{MemoryBlobStore, Store},
};

async fn test_router() -> (Router, Arc<RecordingJobQueue>, Store) {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    vision_store::init_schema(&pool).await.unwrap();
    let store = Store::new(pool);

    let blobs = Arc::new(MemoryBlobStore::default());
    let queue = Arc::new(RecordingJobQueue::default());
    let llm: Arc<dyn LlmResolver> = Arc::new(ProviderFactory::new(ProviderKeys::default()));

    let state = AppState {
        store: store.clone(),
        blobs: blobs.clone(),
        queue: queue.clone(),
        compare: Arc::new(CompareEngine::new(store.clone(), blobs)),
        runs: Arc::new(RunOrchestrator::new(store.clone(), queue.clone())),
        browsers: Arc::new(BrowserRegistry::new()),
        llm,
        vault: None,
        credentials: None,
        #[cfg(feature = "prometheus")]
        metrics: None,
    };

    (build_router(state), queue, store)
}

async fn json_request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    let request = match body {
        Some(json) => request.body(Body::from(json.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok_without_a_vault() {
    let (router, _, _) = test_router().await;
    let (status, body) = json_request(&router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["vault"].is_null());
}

#[tokio::test]
async fn project_page_and_config_crud_round_trips() {
    let (router, _, _) = test_router().await;

    let (status, project) = json_request(
        &router,
        "POST",
        "/projects",
        Some(serde_json::json!({"name": "marketing"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let project_id = project["id"].as_str().unwrap().to_string();

    let (status, page) = json_request(
        &router,
        "POST",
        "/pages",
        Some(serde_json::json!({
            "project_id": project_id,
            "slug": "home",
            "url_path": "/"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["slug"], "home");

    // Duplicate slugs conflict.
    let (status, body) = json_request(
        &router,
        "POST",
        "/pages",
        Some(serde_json::json!({
            "project_id": project_id,
            "slug": "home",
            "url_path": "/other"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("home"));

    let (status, config) = json_request(
        &router,
        "POST",
        "/browser_configs",
        Some(serde_json::json!({
            "project_id": project_id,
            "name": "desktop",
            "browser": "chromium",
            "width": 1920,
            "height": 1080
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["family"], "chromium");

    let (status, list) = json_request(
        &router,
        "GET",
        &format!("/pages?project_id={project_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["pages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn snapshot_creation_queues_a_capture_job() {
    let (router, queue, _) = test_router().await;

    let (_, project) = json_request(
        &router,
        "POST",
        "/projects",
        Some(serde_json::json!({"name": "p"})),
    )
    .await;
    let project_id = project["id"].as_str().unwrap();

    let (_, page) = json_request(
        &router,
        "POST",
        "/pages",
        Some(serde_json::json!({"project_id": project_id, "slug": "home", "url_path": "/"})),
    )
    .await;
    let (_, config) = json_request(
        &router,
        "POST",
        "/browser_configs",
        Some(serde_json::json!({
            "project_id": project_id, "name": "d", "width": 800, "height": 600
        })),
    )
    .await;

    let (status, snapshot) = json_request(
        &router,
        "POST",
        "/snapshots",
        Some(serde_json::json!({
            "page_id": page["id"],
            "browser_config_id": config["id"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["status"], "pending");
    assert_eq!(queue.len(), 1);

    let snapshot_id = snapshot["id"].as_str().unwrap();
    let (status, detail) =
        json_request(&router, "GET", &format!("/snapshots/{snapshot_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(detail["comparison"].is_null());
}

#[tokio::test]
async fn test_run_over_empty_matrix_passes_immediately() {
    let (router, _, _) = test_router().await;

    let (_, project) = json_request(
        &router,
        "POST",
        "/projects",
        Some(serde_json::json!({"name": "p"})),
    )
    .await;

    let (status, run) = json_request(
        &router,
        "POST",
        "/test_runs",
        Some(serde_json::json!({"project_id": project["id"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "passed");
    assert_eq!(run["total_pages"], 0);
}

#[tokio::test]
async fn unknown_ids_return_structured_not_found() {
    let (router, _, _) = test_router().await;

    let (status, body) = json_request(&router, "GET", "/snapshots/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn credential_endpoints_require_a_configured_vault() {
    let (router, _, _) = test_router().await;

    let (_, project) = json_request(
        &router,
        "POST",
        "/projects",
        Some(serde_json::json!({"name": "p"})),
    )
    .await;

    let (status, body) = json_request(
        &router,
        "POST",
        "/credentials",
        Some(serde_json::json!({
            "project_id": project["id"],
            "name": "login",
            "password": "secret"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}

#[tokio::test]
async fn task_stop_flag_round_trips_through_the_api() {
    let (router, queue, store) = test_router().await;

    let (_, project) = json_request(
        &router,
        "POST",
        "/projects",
        Some(serde_json::json!({"name": "p"})),
    )
    .await;

    let (status, task) = json_request(
        &router,
        "POST",
        "/tasks",
        Some(serde_json::json!({
            "project_id": project["id"],
            "instruction": "check the signup flow"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.len(), 1);

    let task_id = task["id"].as_str().unwrap();
    let (status, _) =
        json_request(&router, "POST", &format!("/tasks/{task_id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(store.tasks().is_stop_requested(task_id).await.unwrap());
}
