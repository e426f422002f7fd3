use {
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    vision_store::BlobStore,
};

use crate::{error::ApiResult, state::AppState};

#[derive(Deserialize)]
pub struct ApproveBody {
    pub user_email: String,
    #[serde(default)]
    pub update_baseline: bool,
}

#[derive(Deserialize)]
pub struct RejectBody {
    pub user_email: String,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let comparison = state
        .compare
        .approve(&id, body.update_baseline, &body.user_email)
        .await?;
    Ok(Json(serde_json::to_value(&comparison).unwrap_or_default()))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let comparison = state
        .compare
        .reject(&id, &body.user_email, body.notes.as_deref())
        .await?;
    Ok(Json(serde_json::to_value(&comparison).unwrap_or_default()))
}

#[derive(Deserialize)]
pub struct UpdateBaselineBody {
    #[serde(default = "default_promoter")]
    pub user_email: String,
}

fn default_promoter() -> String {
    "system".into()
}

/// Promote the comparison's snapshot to the active baseline without
/// touching its review state.
pub async fn update_baseline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateBaselineBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let comparison = state.store.comparisons().get(&id).await?;
    let snapshot = state.store.snapshots().get(&comparison.snapshot_id).await?;
    let baseline = state.store.baselines().promote(&snapshot, &body.user_email).await?;
    state.store.comparisons().set_baseline(&id, &baseline.id).await?;

    Ok(Json(serde_json::to_value(&baseline).unwrap_or_default()))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let comparison = state.store.comparisons().get(&id).await?;
    let mut body = serde_json::to_value(&comparison).unwrap_or_default();
    body["diff_image_url"] = comparison
        .diff_image_key
        .as_deref()
        .map(|key| serde_json::Value::String(state.blobs.url(key)))
        .unwrap_or(serde_json::Value::Null);
    Ok(Json(body))
}
