use {
    axum::{
        Json,
        extract::{Path, Query, State},
    },
    serde::Deserialize,
    vision_store::{models::PageSettings, pages::NewPage},
};

use crate::{error::ApiResult, state::AppState};

#[derive(Deserialize)]
pub struct ProjectScope {
    pub project_id: String,
}

#[derive(Deserialize)]
pub struct PageBody {
    #[serde(default)]
    pub project_id: Option<String>,
    pub slug: String,
    pub url_path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: PageSettings,
}

fn default_enabled() -> bool {
    true
}

impl PageBody {
    fn into_new_page(self) -> NewPage {
        NewPage {
            slug: self.slug,
            url_path: self.url_path,
            enabled: self.enabled,
            settings: self.settings,
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<PageBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let project_id = body
        .project_id
        .clone()
        .ok_or_else(|| crate::error::ApiError::validation("project_id is required"))?;
    let page = state
        .store
        .pages()
        .create(&project_id, body.into_new_page())
        .await?;
    Ok(Json(serde_json::to_value(&page).unwrap_or_default()))
}

pub async fn list(
    State(state): State<AppState>,
    Query(scope): Query<ProjectScope>,
) -> ApiResult<Json<serde_json::Value>> {
    let pages = state.store.pages().list(&scope.project_id).await?;
    Ok(Json(serde_json::json!({"pages": pages})))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state.store.pages().get(&id).await?;
    Ok(Json(serde_json::to_value(&page).unwrap_or_default()))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PageBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state.store.pages().update(&id, body.into_new_page()).await?;
    Ok(Json(serde_json::to_value(&page).unwrap_or_default()))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.pages().delete(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}
