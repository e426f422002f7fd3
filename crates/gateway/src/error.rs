//! API error mapping: every failure becomes `{error, details?}` with a
//! status derived from the shared error kind.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    vision_common::{Error as CommonError, ErrorKind},
};

#[derive(Debug)]
pub struct ApiError(pub CommonError);

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(CommonError::validation(message))
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self(CommonError::not_found(entity, id))
    }

    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        Self(CommonError::upstream(service, message))
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::PoolTimeout => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Browser => StatusCode::BAD_GATEWAY,
        ErrorKind::Image => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        let mut body = serde_json::json!({"error": self.0.message});
        if let Some(details) = self.0.details {
            body["details"] = details;
        }

        if status.is_server_error() {
            tracing::error!(kind = self.0.kind.as_str(), error = %body["error"], "request failed");
        }

        (status, Json(body)).into_response()
    }
}

impl From<vision_store::StoreError> for ApiError {
    fn from(err: vision_store::StoreError) -> Self {
        use vision_store::StoreError as E;
        let kind = match &err {
            E::NotFound { .. } | E::BlobNotFound(_) => ErrorKind::NotFound,
            E::Conflict(_) => ErrorKind::Conflict,
            E::Invalid { .. } => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        };
        Self(CommonError::new(kind, err.to_string()))
    }
}

impl From<vision_browser::BrowserError> for ApiError {
    fn from(err: vision_browser::BrowserError) -> Self {
        use vision_browser::BrowserError as E;
        let kind = match &err {
            E::PoolTimeout(_) => ErrorKind::PoolTimeout,
            E::InvalidAction(_) | E::InvalidSelector(_) => ErrorKind::Validation,
            E::SessionNotFound(_) | E::ElementNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Browser,
        };
        Self(CommonError::new(kind, err.to_string()))
    }
}

impl From<vision_llm::LlmError> for ApiError {
    fn from(err: vision_llm::LlmError) -> Self {
        use vision_llm::LlmError as E;
        let kind = match &err {
            E::UnknownModel(_) | E::MissingApiKey(_) => ErrorKind::Validation,
            E::RateLimited { .. } => ErrorKind::RateLimited,
            _ => ErrorKind::UpstreamUnavailable,
        };
        Self(CommonError::new(kind, err.to_string()))
    }
}

impl From<vision_pipeline::PipelineError> for ApiError {
    fn from(err: vision_pipeline::PipelineError) -> Self {
        use vision_pipeline::PipelineError as E;
        match err {
            E::Store(store) => store.into(),
            E::Browser(browser) => browser.into(),
            E::Image(image) => Self(CommonError::new(ErrorKind::Image, image.to_string())),
            E::MissingBaseline(id) => Self(CommonError::new(
                ErrorKind::NotFound,
                format!("no active baseline for snapshot {id}"),
            )),
            other => Self(CommonError::new(ErrorKind::Internal, other.to_string())),
        }
    }
}

impl From<vision_vault::VaultError> for ApiError {
    fn from(err: vision_vault::VaultError) -> Self {
        use vision_vault::VaultError as E;
        match err {
            E::Store(store) => store.into(),
            E::SecretNotFound(key) => Self(CommonError::not_found("secret", &key)),
            E::Expired(name) | E::Inactive(name) => Self(CommonError::new(
                ErrorKind::Validation,
                format!("credential {name} is not usable"),
            )),
            other => Self(CommonError::upstream("secret store", other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_http_statuses() {
        let not_found: ApiError = vision_store::StoreError::not_found("page", "x").into();
        assert_eq!(status_for(not_found.0.kind), StatusCode::NOT_FOUND);

        let conflict: ApiError = vision_store::StoreError::Conflict("dup".into()).into();
        assert_eq!(status_for(conflict.0.kind), StatusCode::CONFLICT);
    }

    #[test]
    fn pool_timeout_is_service_unavailable() {
        let err: ApiError = vision_browser::BrowserError::PoolTimeout(30).into();
        assert_eq!(status_for(err.0.kind), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unknown_model_is_a_validation_error() {
        let err: ApiError = vision_llm::LlmError::UnknownModel("llama".into()).into();
        assert_eq!(status_for(err.0.kind), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
