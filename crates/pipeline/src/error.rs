use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] vision_store::StoreError),

    #[error(transparent)]
    Browser(#[from] vision_browser::BrowserError),

    #[error(transparent)]
    Image(#[from] vision_differ::Error),

    #[error("no active baseline for snapshot {0}")]
    MissingBaseline(String),

    #[error("snapshot {0} has no stored image")]
    MissingImage(String),

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
