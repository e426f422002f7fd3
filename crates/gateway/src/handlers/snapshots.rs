use {
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    vision_pipeline::JobQueue,
    vision_store::{BlobStore, models::NewSnapshotContext},
};

use crate::{error::ApiResult, state::AppState};

#[derive(Deserialize)]
pub struct CreateSnapshot {
    pub page_id: String,
    pub browser_config_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// Create a pending snapshot and queue its capture.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSnapshot>,
) -> ApiResult<Json<serde_json::Value>> {
    let snapshot = state
        .store
        .snapshots()
        .create(
            &body.page_id,
            &body.browser_config_id,
            NewSnapshotContext {
                test_run_id: None,
                branch: body.branch.unwrap_or_else(|| "main".into()),
                commit_sha: body.commit_sha,
                environment: body.environment,
            },
        )
        .await?;

    state.queue.enqueue(vision_pipeline::Job::Capture {
        snapshot_id: snapshot.id.clone(),
    });

    Ok(Json(serde_json::to_value(&snapshot).unwrap_or_default()))
}

/// Queue a (re-)comparison of an already-captured snapshot.
pub async fn compare(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    // Existence check before queueing.
    let snapshot = state.store.snapshots().get(&id).await?;
    state.queue.enqueue(vision_pipeline::Job::Compare {
        snapshot_id: snapshot.id.clone(),
    });

    Ok(Json(serde_json::json!({"queued": snapshot.id})))
}

/// Snapshot detail with its latest comparison and artifact URLs.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let snapshot = state.store.snapshots().get(&id).await?;
    let comparison = state.store.comparisons().latest_for_snapshot(&id).await?;

    let mut body = serde_json::to_value(&snapshot).unwrap_or_default();
    body["image_url"] = snapshot
        .image_key
        .as_deref()
        .map(|key| serde_json::Value::String(state.blobs.url(key)))
        .unwrap_or(serde_json::Value::Null);
    body["thumbnail_url"] = snapshot
        .thumbnail_key
        .as_deref()
        .map(|key| serde_json::Value::String(state.blobs.url(key)))
        .unwrap_or(serde_json::Value::Null);
    body["comparison"] = match comparison {
        Some(comparison) => {
            let mut value = serde_json::to_value(&comparison).unwrap_or_default();
            value["diff_image_url"] = comparison
                .diff_image_key
                .as_deref()
                .map(|key| serde_json::Value::String(state.blobs.url(key)))
                .unwrap_or(serde_json::Value::Null);
            value
        },
        None => serde_json::Value::Null,
    };

    Ok(Json(body))
}
