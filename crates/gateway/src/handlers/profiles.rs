//! Browser config (capture profile) endpoints.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
    },
    serde::Deserialize,
    vision_store::{models::BrowserFamily, profiles::NewBrowserProfile},
};

use crate::{
    error::{ApiError, ApiResult},
    handlers::pages::ProjectScope,
    state::AppState,
};

#[derive(Deserialize)]
pub struct ProfileBody {
    pub project_id: String,
    pub name: String,
    #[serde(default = "default_family")]
    pub browser: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale")]
    pub device_scale_factor: f64,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub has_touch: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_family() -> String {
    "chromium".into()
}

fn default_scale() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<ProfileBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let family = BrowserFamily::parse(&body.browser)
        .map_err(|_| ApiError::validation(format!("unknown browser family {}", body.browser)))?;

    let profile = state
        .store
        .profiles()
        .create(
            &body.project_id,
            NewBrowserProfile {
                name: body.name,
                family,
                width: body.width,
                height: body.height,
                device_scale_factor: body.device_scale_factor,
                mobile: body.mobile,
                has_touch: body.has_touch,
                user_agent: body.user_agent,
                enabled: body.enabled,
            },
        )
        .await?;
    Ok(Json(serde_json::to_value(&profile).unwrap_or_default()))
}

pub async fn list(
    State(state): State<AppState>,
    Query(scope): Query<ProjectScope>,
) -> ApiResult<Json<serde_json::Value>> {
    let profiles = state.store.profiles().list(&scope.project_id).await?;
    Ok(Json(serde_json::json!({"browser_configs": profiles})))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let profile = state.store.profiles().get(&id).await?;
    Ok(Json(serde_json::to_value(&profile).unwrap_or_default()))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.profiles().delete(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}
