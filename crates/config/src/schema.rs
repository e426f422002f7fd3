//! Config schema types (gateway, pools, storage, vault).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub gateway: GatewayConfig,
    pub workers: WorkerPoolConfig,
    pub capture: CapturePoolConfig,
    pub storage: StorageConfig,
    pub vault: VaultConfig,
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    /// Expose Prometheus metrics on `/metrics`.
    pub metrics: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            metrics: false,
        }
    }
}

/// Generic AI-task worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of pre-warmed workers.
    pub count: usize,
    /// Checkout timeout in seconds.
    pub checkout_timeout_secs: u64,
    /// Age in seconds after which a worker is considered stale.
    pub stale_after_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            count: 4,
            checkout_timeout_secs: 120,
            stale_after_secs: 30 * 60,
        }
    }
}

/// Per-browser-profile capture pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturePoolConfig {
    pub pool_size: usize,
    pub checkout_timeout_secs: u64,
}

impl Default for CapturePoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            checkout_timeout_secs: 30,
        }
    }
}

/// Database and artifact storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database URL.
    pub database_url: String,
    /// Directory for locally stored artifacts (screenshots, diffs).
    pub artifacts_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://vision.db".into(),
            artifacts_dir: "artifacts".into(),
        }
    }
}

/// External secret-store connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Secret-store base URL (`BRAINZLAB_VAULT_URL`).
    pub url: Option<String>,
    /// Service-level token (`VAULT_SERVICE_TOKEN`).
    pub service_token: Option<String>,
    /// Environment name passed to the store (e.g. "production").
    pub environment: String,
}

impl VisionConfig {
    /// Overlay recognized environment variables onto the loaded file.
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse::<usize>("VISION_WORKER_COUNT") {
            self.workers.count = n;
        }
        if let Some(n) = env_parse::<u64>("VISION_WORKER_TIMEOUT") {
            self.workers.checkout_timeout_secs = n;
        }
        if let Some(n) = env_parse::<usize>("BROWSER_POOL_SIZE") {
            self.capture.pool_size = n;
        }
        if let Some(n) = env_parse::<u64>("BROWSER_POOL_TIMEOUT") {
            self.capture.checkout_timeout_secs = n;
        }
        if let Ok(url) = std::env::var("BRAINZLAB_VAULT_URL")
            && !url.is_empty()
        {
            self.vault.url = Some(url);
        }
        if let Ok(token) = std::env::var("VAULT_SERVICE_TOKEN")
            && !token.is_empty()
        {
            self.vault.service_token = Some(token);
        }
        if let Ok(url) = std::env::var("DATABASE_URL")
            && !url.is_empty()
        {
            self.storage.database_url = url;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = raw, "ignoring unparseable env override");
            None
        },
    }
}
