//! AI task endpoints: create + enqueue, inspect with steps, request stop.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
    },
    serde::Deserialize,
    vision_pipeline::JobQueue,
    vision_store::tasks::NewAiTask,
};

use crate::{error::ApiResult, handlers::pages::ProjectScope, state::AppState};

#[derive(Deserialize)]
pub struct CreateTask {
    pub project_id: String,
    pub instruction: String,
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub browser_provider: Option<String>,
    #[serde(default)]
    pub max_steps: Option<i64>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub viewport_width: Option<u32>,
    #[serde(default)]
    pub viewport_height: Option<u32>,
    #[serde(default = "default_capture")]
    pub capture_screenshots: bool,
}

fn default_capture() -> bool {
    true
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateTask>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = state.store.projects().get(&body.project_id).await?;
    let defaults = NewAiTask::default();

    let task = state
        .store
        .tasks()
        .create(
            &body.project_id,
            NewAiTask {
                instruction: body.instruction,
                start_url: body.start_url,
                model: body.model.unwrap_or_else(|| project.settings.default_model.clone()),
                browser_provider: body
                    .browser_provider
                    .unwrap_or_else(|| project.settings.default_browser_provider.clone()),
                max_steps: body.max_steps.unwrap_or(defaults.max_steps),
                timeout_seconds: body.timeout_seconds.unwrap_or(defaults.timeout_seconds),
                viewport_width: body.viewport_width.unwrap_or(defaults.viewport_width),
                viewport_height: body.viewport_height.unwrap_or(defaults.viewport_height),
                capture_screenshots: body.capture_screenshots,
            },
        )
        .await?;

    state.queue.enqueue(vision_pipeline::Job::RunAiTask {
        task_id: task.id.clone(),
    });

    Ok(Json(serde_json::to_value(&task).unwrap_or_default()))
}

pub async fn list(
    State(state): State<AppState>,
    Query(scope): Query<ProjectScope>,
) -> ApiResult<Json<serde_json::Value>> {
    let tasks = state.store.tasks().list(&scope.project_id).await?;
    Ok(Json(serde_json::json!({"tasks": tasks})))
}

/// Task detail including its ordered steps.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let task = state.store.tasks().get(&id).await?;
    let steps = state.store.tasks().steps(&id).await?;

    let mut body = serde_json::to_value(&task).unwrap_or_default();
    body["steps"] = serde_json::to_value(&steps).unwrap_or_default();
    Ok(Json(body))
}

/// Cooperative stop: the executor honors the flag at its next iteration.
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.tasks().request_stop(&id).await?;
    Ok(Json(serde_json::json!({"stop_requested": id})))
}
