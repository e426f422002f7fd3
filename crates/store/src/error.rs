use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("blob {0} not found")]
    BlobNotFound(String),

    #[error("blob store I/O: {0}")]
    BlobIo(#[from] std::io::Error),

    #[error("corrupt column {column}: {source}")]
    Corrupt {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }

    /// Unique-constraint violations surface as `Conflict` so callers can
    /// distinguish races from plain database failures.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.message().contains("UNIQUE"),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
