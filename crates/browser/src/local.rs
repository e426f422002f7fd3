//! Local variant: launches headless Chromium via the CDP driver.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chromiumoxide::{Browser, browser::BrowserConfig as CdpBrowserConfig},
    futures::StreamExt,
    tracing::info,
};

use crate::{
    capability::BrowserCapability,
    error::{Error, Result},
    session::{CdpSession, SessionMap},
    types::{BrowserAction, ElementExtraction, SessionSpec, Viewport},
};

/// Launch options for local Chromium.
#[derive(Debug, Clone, Default)]
pub struct LocalBrowserConfig {
    /// Explicit Chrome/Chromium binary; auto-detected when unset.
    pub chrome_path: Option<String>,
    /// Extra Chrome arguments appended to the defaults.
    pub extra_args: Vec<String>,
}

pub struct LocalBrowser {
    config: LocalBrowserConfig,
    sessions: SessionMap,
}

impl LocalBrowser {
    pub fn new(config: LocalBrowserConfig) -> Self {
        Self {
            config,
            sessions: SessionMap::default(),
        }
    }

    async fn launch(&self, spec: &SessionSpec) -> Result<CdpSession> {
        let mut builder = CdpBrowserConfig::builder()
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: spec.viewport.width,
                height: spec.viewport.height,
                device_scale_factor: Some(spec.device_scale_factor),
                emulating_mobile: spec.mobile,
                is_landscape: !spec.mobile,
                has_touch: spec.has_touch,
            })
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        if let Some(ref ua) = spec.user_agent {
            builder = builder.arg(format!("--user-agent={ua}"));
        }
        if let Some(ref path) = self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        for arg in &self.config.extra_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| Error::LaunchFailed(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        CdpSession::attach(browser, handler_task, spec).await
    }
}

#[async_trait]
impl BrowserCapability for LocalBrowser {
    fn provider(&self) -> &str {
        "local"
    }

    async fn create_session(&self, spec: &SessionSpec) -> Result<String> {
        let session = self.launch(spec).await?;
        let session_id = new_session_id();
        self.sessions.insert(session_id.clone(), Arc::new(session));

        info!(
            session_id,
            width = spec.viewport.width,
            height = spec.viewport.height,
            "launched local browser session"
        );
        Ok(session_id)
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        self.sessions.remove_and_close(session_id).await;
        Ok(())
    }

    async fn navigate(&self, session_id: &str, url: &str) -> Result<()> {
        self.sessions.get(session_id)?.navigate(url).await
    }

    async fn perform_action(&self, session_id: &str, action: &BrowserAction) -> Result<()> {
        self.sessions.get(session_id)?.perform(action).await
    }

    async fn screenshot(&self, session_id: &str, full_page: bool) -> Result<Vec<u8>> {
        self.sessions.get(session_id)?.screenshot(full_page).await
    }

    async fn page_content(&self, session_id: &str) -> Result<String> {
        self.sessions.get(session_id)?.content().await
    }

    async fn current_url(&self, session_id: &str) -> Result<String> {
        self.sessions.get(session_id)?.url().await
    }

    async fn current_title(&self, session_id: &str) -> Result<String> {
        self.sessions.get(session_id)?.title().await
    }

    async fn evaluate(&self, session_id: &str, script: &str) -> Result<serde_json::Value> {
        self.sessions.get(session_id)?.evaluate(script).await
    }

    async fn wait_for_selector(
        &self,
        session_id: &str,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<()> {
        self.sessions
            .get(session_id)?
            .wait_for_selector(selector, timeout_ms)
            .await
    }

    async fn wait_for_navigation(&self, session_id: &str) -> Result<()> {
        self.sessions.get(session_id)?.wait_for_navigation().await
    }

    async fn is_session_alive(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Ok(session) => session.is_alive().await,
            Err(_) => false,
        }
    }

    async fn extract_elements(&self, session_id: &str) -> Result<ElementExtraction> {
        self.sessions.get(session_id)?.extract_elements().await
    }

    async fn set_viewport(&self, session_id: &str, viewport: Viewport) -> Result<()> {
        self.sessions.get(session_id)?.set_viewport(viewport).await
    }

    async fn clear_cookies(&self, session_id: &str) -> Result<()> {
        self.sessions.get(session_id)?.clear_cookies().await
    }
}

pub(crate) fn new_session_id() -> String {
    use rand::Rng;
    let id: u64 = rand::rng().random();
    format!("browser-{id:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_prefixed() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert!(a.starts_with("browser-"));
    }
}
