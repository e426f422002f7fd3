use {
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    vision_store::models::ProjectSettings,
};

use crate::{error::ApiResult, state::AppState};

#[derive(Deserialize)]
pub struct CreateProject {
    pub name: String,
    #[serde(default)]
    pub settings: Option<ProjectSettings>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateProject>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = state
        .store
        .projects()
        .create(&body.name, body.settings.unwrap_or_default())
        .await?;
    Ok(Json(serde_json::to_value(&project).unwrap_or_default()))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let projects = state.store.projects().list().await?;
    Ok(Json(serde_json::json!({"projects": projects})))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = state.store.projects().get(&id).await?;
    Ok(Json(serde_json::to_value(&project).unwrap_or_default()))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(settings): Json<ProjectSettings>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.projects().update_settings(&id, &settings).await?;
    let project = state.store.projects().get(&id).await?;
    Ok(Json(serde_json::to_value(&project).unwrap_or_default()))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.projects().delete(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}
