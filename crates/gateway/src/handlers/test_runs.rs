use {
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    vision_pipeline::RunContext,
};

use crate::{error::ApiResult, state::AppState};

#[derive(Deserialize)]
pub struct CreateTestRun {
    pub project_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// Start a run over the project's enabled page × browser matrix.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateTestRun>,
) -> ApiResult<Json<serde_json::Value>> {
    let run = state
        .runs
        .start_run(
            &body.project_id,
            RunContext {
                branch: body.branch,
                commit_sha: body.commit_sha,
                environment: body.environment,
            },
        )
        .await?;
    Ok(Json(serde_json::to_value(&run).unwrap_or_default()))
}

/// Run detail with its comparisons.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let run = state.store.test_runs().get(&id).await?;
    let comparisons = state.store.comparisons().list_for_run(&id).await?;

    let mut body = serde_json::to_value(&run).unwrap_or_default();
    body["comparisons"] = serde_json::to_value(&comparisons).unwrap_or_default();
    Ok(Json(body))
}
