//! Credential reference endpoints. Secret bytes flow straight through to
//! the external store; responses never echo them.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
    },
    serde::Deserialize,
    vision_store::models::CredentialType,
};

use crate::{
    error::{ApiError, ApiResult},
    handlers::pages::ProjectScope,
    state::AppState,
};

#[derive(Deserialize)]
pub struct CreateCredential {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub username: String,
    pub password: String,
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_type", rename = "type")]
    pub credential_type: String,
}

fn default_service_url() -> String {
    "*".into()
}

fn default_type() -> String {
    "login".into()
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateCredential>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(credentials) = state.credentials.as_ref() else {
        return Err(ApiError::upstream("secret store", "not configured"));
    };

    let credential_type = CredentialType::parse(&body.credential_type)
        .map_err(|_| ApiError::validation(format!("unknown credential type {}", body.credential_type)))?;

    let project = state.store.projects().get(&body.project_id).await?;
    let credential = credentials
        .store(
            &body.project_id,
            &body.name,
            &body.username,
            &body.password,
            &body.service_url,
            credential_type,
            project.vault_token.as_deref(),
        )
        .await?;

    Ok(Json(serde_json::to_value(&credential).unwrap_or_default()))
}

pub async fn list(
    State(state): State<AppState>,
    Query(scope): Query<ProjectScope>,
) -> ApiResult<Json<serde_json::Value>> {
    let credentials = state.store.credentials().list_active(&scope.project_id).await?;
    Ok(Json(serde_json::json!({"credentials": credentials})))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let credential = state.store.credentials().get(&id).await?;
    Ok(Json(serde_json::to_value(&credential).unwrap_or_default()))
}

/// Verify the reference resolves in the secret store.
pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(credentials) = state.credentials.as_ref() else {
        return Err(ApiError::upstream("secret store", "not configured"));
    };

    let credential = state.store.credentials().get(&id).await?;
    let project = state.store.projects().get(&credential.project_id).await?;
    let ok = credentials.test(&credential, project.vault_token.as_deref()).await;

    Ok(Json(serde_json::json!({"credential_id": id, "ok": ok})))
}

/// Destroy deactivates only; the row and the stored secret are retained
/// for audit.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.credentials().deactivate(&id).await?;
    Ok(Json(serde_json::json!({"deactivated": id})))
}
