//! Shared application state handed to every handler.

use std::sync::Arc;

use {
    vision_browser::BrowserRegistry,
    vision_llm::LlmResolver,
    vision_pipeline::{CompareEngine, JobQueue, RunOrchestrator},
    vision_store::{BlobStore, Store},
    vision_vault::{CredentialService, VaultClient},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub compare: Arc<CompareEngine>,
    pub runs: Arc<RunOrchestrator>,
    pub browsers: Arc<BrowserRegistry>,
    pub llm: Arc<dyn LlmResolver>,
    /// Present only when the secret store is configured.
    pub vault: Option<Arc<VaultClient>>,
    pub credentials: Option<Arc<CredentialService>>,
    #[cfg(feature = "prometheus")]
    pub metrics: Option<vision_metrics::PrometheusHandle>,
}
