use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("secret store is not configured")]
    NotConfigured,

    #[error("secret {0} not found")]
    SecretNotFound(String),

    #[error("secret store error HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("secret store unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential {0} is expired")]
    Expired(String),

    #[error("credential {0} is inactive")]
    Inactive(String),

    #[error(transparent)]
    Store(#[from] vision_store::StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;
