use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no provider knows model {0}")]
    UnknownModel(String),

    #[error("no API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("{provider} API error HTTP {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} rate limited")]
    RateLimited { provider: &'static str },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error("no JSON object found in model output")]
    NoJsonFound,
}

impl Error {
    /// Transient failures worth retrying at the call site.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
