use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] vision_store::StoreError),

    #[error(transparent)]
    Browser(#[from] vision_browser::BrowserError),

    #[error(transparent)]
    Llm(#[from] vision_llm::LlmError),

    #[error("task failed after {0} consecutive action failures")]
    TooManyFailures(u32),

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
