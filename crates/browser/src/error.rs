//! Browser error types.

use thiserror::Error;

/// Errors that can occur during browser operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("element {0} not found")]
    ElementNotFound(String),

    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("JavaScript evaluation failed: {0}")]
    JsEvalFailed(String),

    #[error("worker pool checkout timed out after {0}s")]
    PoolTimeout(u64),

    #[error("cloud provider error: {0}")]
    Provider(String),

    #[error("CDP error: {0}")]
    Cdp(String),
}

/// Substrings that indicate the CDP WebSocket connection is dead.
const STALE_CONNECTION_PATTERNS: &[&str] = &[
    "receiver is gone",
    "oneshot canceled",
    "Request timed out",
    "Connection closed",
    "AlreadyClosed",
    "closed connection",
];

impl Error {
    /// Returns `true` when this error indicates the CDP connection to the
    /// browser is dead and the session should be recycled.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionLost(_) => true,

            // Message-bearing variants — check for known stale-connection patterns
            Self::Cdp(msg)
            | Self::ScreenshotFailed(msg)
            | Self::JsEvalFailed(msg)
            | Self::NavigationFailed(msg)
            | Self::Timeout(msg) => STALE_CONNECTION_PATTERNS.iter().any(|p| msg.contains(p)),

            _ => false,
        }
    }

    /// Transient failures worth a local retry: timeouts and dropped
    /// connections, never invalid input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ConnectionLost(_)) || self.is_connection_error()
    }
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
