//! Session acquisition helpers and hooks around task startup.

use std::sync::Arc;

use {async_trait::async_trait, vision_browser::BrowserCapability, vision_store::models::AiTask};

/// Optional work to run after the session is staged but before the main
/// loop, typically a credential login against the target service.
#[async_trait]
pub trait TaskHook: Send + Sync {
    async fn before_execute(
        &self,
        capability: &Arc<dyn BrowserCapability>,
        session_id: &str,
        task: &AiTask,
    );
}

/// Whether the browser has drifted away from the task's start URL, e.g.
/// after a post-login redirect.
///
/// Paths are compared by substring inclusion of the start path in the
/// current path. That is deliberately loose ("/app" matches
/// "/app/dashboard") and matches how recovery has always behaved here; a
/// stricter prefix comparison would re-navigate in cases that used to be
/// left alone.
pub fn needs_start_url_revisit(current_url: &str, start_url: &str) -> bool {
    let current_path = path_of(current_url);
    let start_path = path_of(start_url);

    if start_path.is_empty() || start_path == "/" {
        return false;
    }
    !current_path.contains(start_path.as_str())
}

fn path_of(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw.to_string(),
    }
}
