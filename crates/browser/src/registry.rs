//! Provider-name → capability resolution.

use std::{collections::HashMap, sync::Arc};

use tracing::info;

use crate::{
    capability::BrowserCapability,
    cloud::{CloudBrowser, CloudProviderKind},
    error::{Error, Result},
    local::{LocalBrowser, LocalBrowserConfig},
};

/// Registry of configured browser capabilities, keyed by provider name.
/// Instantiated once at wiring time and shared; there is no process-wide
/// default.
pub struct BrowserRegistry {
    providers: HashMap<String, Arc<dyn BrowserCapability>>,
}

impl BrowserRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, capability: Arc<dyn BrowserCapability>) {
        self.providers.insert(capability.provider().to_string(), capability);
    }

    /// Local Chromium plus whichever cloud providers have keys in the
    /// environment.
    pub fn from_env(local: LocalBrowserConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalBrowser::new(local)));

        for kind in [
            CloudProviderKind::Browserless,
            CloudProviderKind::Browserbase,
            CloudProviderKind::Steel,
            CloudProviderKind::Hyperbrowser,
        ] {
            if let Some(cloud) = CloudBrowser::from_env(kind) {
                info!(provider = kind.name(), "registered cloud browser provider");
                registry.register(Arc::new(cloud));
            }
        }

        registry
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn BrowserCapability>> {
        self.providers
            .get(provider)
            .cloned()
            .ok_or_else(|| Error::Provider(format!("unknown browser provider {provider}")))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl Default for BrowserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
