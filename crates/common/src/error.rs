use {serde::Serialize, thiserror::Error};

/// Stable error classification shared by every surface of the system.
///
/// Subsystem crates keep their own `thiserror` enums; anything that crosses
/// a crate boundary toward the API or the CLI is folded into this type so
/// callers never match on internal exception names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Forbidden,
    PoolTimeout,
    Browser,
    Image,
    UpstreamUnavailable,
    RateLimited,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::PoolTimeout => "pool_timeout",
            Self::Browser => "browser",
            Self::Image => "image",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::RateLimited => "rate_limited",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

/// A classified error with an operator-facing message and optional
/// structured details for the JSON surface.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// `NotFound` with the conventional "<entity> <id> not found" message.
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{entity} {id} not found"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UpstreamUnavailable,
            format!("{service} unavailable: {}", message.into()),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_snake_case() {
        assert_eq!(ErrorKind::PoolTimeout.as_str(), "pool_timeout");
        assert_eq!(
            ErrorKind::UpstreamUnavailable.as_str(),
            "upstream_unavailable"
        );
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = Error::not_found("page", "abc123");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "page abc123 not found");
    }
}
