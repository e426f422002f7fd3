//! Cloud variants: the session lives with a remote browser provider,
//! created over HTTPS and then driven over the same CDP WebSocket contract
//! as the local variant.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chromiumoxide::Browser,
    dashmap::DashMap,
    futures::StreamExt,
    serde_json::Value,
    tracing::{info, warn},
};

use crate::{
    capability::BrowserCapability,
    error::{Error, Result},
    local::new_session_id,
    session::{CdpSession, SessionMap},
    types::{BrowserAction, ElementExtraction, SessionSpec, Viewport},
};

/// Supported remote browser providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProviderKind {
    Browserless,
    Browserbase,
    Steel,
    Hyperbrowser,
}

impl CloudProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Browserless => "browserless",
            Self::Browserbase => "browserbase",
            Self::Steel => "steel",
            Self::Hyperbrowser => "hyperbrowser",
        }
    }

    /// Environment variable consulted when the project settings carry no
    /// key for this provider.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Browserless => "BROWSERLESS_API_KEY",
            Self::Browserbase => "BROWSERBASE_API_KEY",
            Self::Steel => "STEEL_API_KEY",
            Self::Hyperbrowser => "HYPERBROWSER_API_KEY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "browserless" => Some(Self::Browserless),
            "browserbase" => Some(Self::Browserbase),
            "steel" => Some(Self::Steel),
            "hyperbrowser" => Some(Self::Hyperbrowser),
            _ => None,
        }
    }
}

/// A remote session as created by the provider API: the CDP endpoint we
/// attach to, plus the provider's own session id for later release.
struct RemoteSession {
    ws_url: String,
    provider_session_id: Option<String>,
}

pub struct CloudBrowser {
    kind: CloudProviderKind,
    api_key: String,
    http: reqwest::Client,
    sessions: SessionMap,
    /// Our session id → the provider's, for remote release on close.
    remote_ids: DashMap<String, String>,
}

impl CloudBrowser {
    pub fn new(kind: CloudProviderKind, api_key: String) -> Self {
        Self {
            kind,
            api_key,
            http: reqwest::Client::new(),
            sessions: SessionMap::default(),
            remote_ids: DashMap::new(),
        }
    }

    /// Build from the environment, if the provider's key is configured.
    pub fn from_env(kind: CloudProviderKind) -> Option<Self> {
        let key = std::env::var(kind.api_key_env()).ok().filter(|k| !k.is_empty())?;
        Some(Self::new(kind, key))
    }

    async fn open_remote(&self) -> Result<RemoteSession> {
        match self.kind {
            CloudProviderKind::Browserless => Ok(RemoteSession {
                ws_url: format!(
                    "wss://production-sfo.browserless.io?token={}",
                    self.api_key
                ),
                provider_session_id: None,
            }),
            CloudProviderKind::Browserbase => {
                let body = self
                    .create_via_api(
                        "https://api.browserbase.com/v1/sessions",
                        "x-bb-api-key",
                        serde_json::json!({}),
                    )
                    .await?;
                let ws_url = body["connectUrl"]
                    .as_str()
                    .ok_or_else(|| Error::Provider("browserbase response missing connectUrl".into()))?
                    .to_string();
                Ok(RemoteSession {
                    ws_url,
                    provider_session_id: body["id"].as_str().map(String::from),
                })
            },
            CloudProviderKind::Steel => {
                let body = self
                    .create_via_api(
                        "https://api.steel.dev/v1/sessions",
                        "steel-api-key",
                        serde_json::json!({}),
                    )
                    .await?;
                let id = body["id"]
                    .as_str()
                    .ok_or_else(|| Error::Provider("steel response missing id".into()))?
                    .to_string();
                Ok(RemoteSession {
                    ws_url: format!(
                        "wss://connect.steel.dev?apiKey={}&sessionId={id}",
                        self.api_key
                    ),
                    provider_session_id: Some(id),
                })
            },
            CloudProviderKind::Hyperbrowser => {
                let body = self
                    .create_via_api(
                        "https://api.hyperbrowser.ai/api/session",
                        "x-api-key",
                        serde_json::json!({}),
                    )
                    .await?;
                let ws_url = body["wsEndpoint"]
                    .as_str()
                    .ok_or_else(|| Error::Provider("hyperbrowser response missing wsEndpoint".into()))?
                    .to_string();
                Ok(RemoteSession {
                    ws_url,
                    provider_session_id: body["id"].as_str().map(String::from),
                })
            },
        }
    }

    /// POST the provider's session-create endpoint with transport-level
    /// retries on 429 and 5xx.
    async fn create_via_api(
        &self,
        url: &str,
        key_header: &str,
        body: Value,
    ) -> Result<Value> {
        const MAX_ATTEMPTS: usize = 3;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .http
                .post(url)
                .header(key_header, &self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<Value>()
                        .await
                        .map_err(|e| Error::Provider(e.to_string()));
                },
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < MAX_ATTEMPTS {
                        let backoff = std::time::Duration::from_millis(500 * (1 << attempt));
                        warn!(provider = self.kind.name(), %status, attempt, "session create retrying");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    return Err(Error::Provider(format!(
                        "{} session create failed: HTTP {status}: {text}",
                        self.kind.name()
                    )));
                },
                Err(e) if attempt < MAX_ATTEMPTS => {
                    let backoff = std::time::Duration::from_millis(500 * (1 << attempt));
                    warn!(provider = self.kind.name(), error = %e, attempt, "session create retrying");
                    tokio::time::sleep(backoff).await;
                },
                Err(e) => return Err(Error::Provider(e.to_string())),
            }
        }
    }

    /// Ask the provider to release a remote session. Best-effort; local
    /// teardown already happened.
    async fn release_remote(&self, provider_session_id: &str) {
        let request = match self.kind {
            CloudProviderKind::Browserless => None,
            CloudProviderKind::Browserbase => Some(
                self.http
                    .post(format!(
                        "https://api.browserbase.com/v1/sessions/{provider_session_id}"
                    ))
                    .header("x-bb-api-key", &self.api_key)
                    .json(&serde_json::json!({"status": "REQUEST_RELEASE"})),
            ),
            CloudProviderKind::Steel => Some(
                self.http
                    .post(format!(
                        "https://api.steel.dev/v1/sessions/{provider_session_id}/release"
                    ))
                    .header("steel-api-key", &self.api_key),
            ),
            CloudProviderKind::Hyperbrowser => Some(
                self.http
                    .put(format!(
                        "https://api.hyperbrowser.ai/api/session/{provider_session_id}/stop"
                    ))
                    .header("x-api-key", &self.api_key),
            ),
        };

        if let Some(request) = request
            && let Err(e) = request.send().await
        {
            warn!(
                provider = self.kind.name(),
                provider_session_id,
                error = %e,
                "failed to release remote session"
            );
        }
    }
}

#[async_trait]
impl BrowserCapability for CloudBrowser {
    fn provider(&self) -> &str {
        self.kind.name()
    }

    async fn create_session(&self, spec: &SessionSpec) -> Result<String> {
        let remote = self.open_remote().await?;

        let (browser, mut handler) = Browser::connect(&remote.ws_url)
            .await
            .map_err(|e| Error::Provider(format!("CDP connect failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let session = CdpSession::attach(browser, handler_task, spec).await?;
        let session_id = new_session_id();
        self.sessions.insert(session_id.clone(), Arc::new(session));
        if let Some(remote_id) = remote.provider_session_id {
            self.remote_ids.insert(session_id.clone(), remote_id);
        }

        info!(
            provider = self.kind.name(),
            session_id, "attached cloud browser session"
        );
        Ok(session_id)
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        self.sessions.remove_and_close(session_id).await;
        if let Some((_, remote_id)) = self.remote_ids.remove(session_id) {
            self.release_remote(&remote_id).await;
        }
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

    async fn evaluate(&self, session_id: &str, script: &str) -> Result<Value> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_round_trip() {
        for kind in [
            CloudProviderKind::Browserless,
            CloudProviderKind::Browserbase,
            CloudProviderKind::Steel,
            CloudProviderKind::Hyperbrowser,
        ] {
            assert_eq!(CloudProviderKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(CloudProviderKind::from_name("selenium"), None);
    }
}
