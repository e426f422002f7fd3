//! The abstract surface a browser driver exposes to the rest of the
//! system. Local and cloud variants implement the same contract; callers
//! never branch on which one they hold.

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{BrowserAction, ElementExtraction, SessionSpec, Viewport},
};

#[async_trait]
pub trait BrowserCapability: Send + Sync {
    /// Provider name (e.g. "local", "browserless").
    fn provider(&self) -> &str;

    /// Open a session and return its identifier.
    async fn create_session(&self, spec: &SessionSpec) -> Result<String>;

    async fn close_session(&self, session_id: &str) -> Result<()>;

    /// Navigate and wait for the load to settle. Failures come back as
    /// error values so callers can retry without losing the session.
    async fn navigate(&self, session_id: &str, url: &str) -> Result<()>;

    async fn perform_action(&self, session_id: &str, action: &BrowserAction) -> Result<()>;

    /// PNG screenshot of the viewport, or the full page when requested.
    async fn screenshot(&self, session_id: &str, full_page: bool) -> Result<Vec<u8>>;

    async fn page_content(&self, session_id: &str) -> Result<String>;

    async fn current_url(&self, session_id: &str) -> Result<String>;

    async fn current_title(&self, session_id: &str) -> Result<String>;

    async fn evaluate(&self, session_id: &str, script: &str) -> Result<serde_json::Value>;

    async fn wait_for_selector(
        &self,
        session_id: &str,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<()>;

    async fn wait_for_navigation(&self, session_id: &str) -> Result<()>;

    /// Liveness probe; never errors.
    async fn is_session_alive(&self, session_id: &str) -> bool;

    /// Collect visible interactive elements with typed reference tokens.
    async fn extract_elements(&self, session_id: &str) -> Result<ElementExtraction>;

    /// Reconfigure the session viewport in place.
    async fn set_viewport(&self, session_id: &str, viewport: Viewport) -> Result<()>;

    /// Drop cookies so the next use starts clean.
    async fn clear_cookies(&self, session_id: &str) -> Result<()>;
}
