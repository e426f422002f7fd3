//! Top-level assembly: the one place where pools, stores, providers, and
//! the job queue are instantiated and connected.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context as _,
    async_trait::async_trait,
    tracing::{error, info, warn},
    vision_browser::{BrowserRegistry, KeyedPools, LocalBrowserConfig, PoolConfig, SessionSpec,
        WorkerPool},
    vision_config::VisionConfig,
    vision_executor::TaskExecutor,
    vision_gateway::AppState,
    vision_llm::ProviderFactory,
    vision_pipeline::{CompareEngine, Job, JobHandler, Pipeline, RunOrchestrator, TokioJobQueue},
    vision_store::{BlobStore, FsBlobStore, Store},
    vision_vault::{CredentialService, VaultClient},
};

pub struct App {
    pub state: AppState,
    pub config: VisionConfig,
}

/// Routes capture/compare jobs to the pipeline and AI-task jobs to the
/// executor. The queue itself stays a single enqueue seam.
struct CompositeHandler {
    pipeline: Pipeline,
    executor: Arc<TaskExecutor>,
}

#[async_trait]
impl JobHandler for CompositeHandler {
    async fn handle(&self, job: Job) {
        match job {
            Job::RunAiTask { task_id } => {
                if let Err(e) = self.executor.execute(&task_id).await {
                    error!(task_id, error = %e, "AI task failed");
                }
            },
            other => self.pipeline.handle(other).await,
        }
    }
}

/// Build the whole application from configuration.
pub async fn build(config: VisionConfig) -> anyhow::Result<App> {
    let pool = vision_store::connect(&config.storage.database_url)
        .await
        .context("opening database")?;
    let store = Store::new(pool);

    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.storage.artifacts_dir));

    let registry = Arc::new(BrowserRegistry::from_env(LocalBrowserConfig::default()));
    let local = registry.get("local").context("local browser registration")?;

    let capture_pools = Arc::new(KeyedPools::new(
        local.clone(),
        config.capture.pool_size,
        Duration::from_secs(config.capture.checkout_timeout_secs),
        Duration::from_secs(config.workers.stale_after_secs),
    ));

    // Generic pre-warmed pool shared by AI-task work on the local browser.
    let worker_pool = Arc::new(WorkerPool::new(
        local,
        SessionSpec::default(),
        PoolConfig {
            size: config.workers.count,
            checkout_timeout: Duration::from_secs(config.workers.checkout_timeout_secs),
            stale_after: Duration::from_secs(config.workers.stale_after_secs),
        },
    ));

    let llm = Arc::new(ProviderFactory::from_env());

    let vault = config
        .vault
        .url
        .as_deref()
        .zip(config.vault.service_token.as_deref())
        .map(|(url, token)| {
            Arc::new(VaultClient::new(
                url.to_string(),
                token.to_string(),
                config.vault.environment.clone(),
            ))
        });
    if vault.is_none() {
        warn!("secret store not configured, credential endpoints disabled");
    }
    let credentials = vault.as_ref().map(|client| {
        Arc::new(CredentialService::new(
            store.credentials(),
            client.as_ref().clone(),
        ))
    });

    let pipeline = Pipeline::new(store.clone(), blobs.clone(), capture_pools.clone());
    let executor = Arc::new(
        TaskExecutor::new(store.clone(), blobs.clone(), llm.clone(), registry.clone())
            .with_pool(worker_pool),
    );

    let queue = Arc::new(TokioJobQueue::new(Arc::new(CompositeHandler {
        pipeline,
        executor,
    })));

    let compare = Arc::new(CompareEngine::new(store.clone(), blobs.clone()));
    let runs = Arc::new(RunOrchestrator::new(store.clone(), queue.clone()));

    #[cfg(feature = "prometheus")]
    let metrics = if config.gateway.metrics {
        Some(vision_metrics::install_prometheus().context("installing metrics recorder")?)
    } else {
        None
    };

    info!(
        database = config.storage.database_url,
        artifacts = config.storage.artifacts_dir,
        workers = config.workers.count,
        capture_pool = config.capture.pool_size,
        "vision assembled"
    );

    Ok(App {
        state: AppState {
            store,
            blobs,
            queue,
            compare,
            runs,
            browsers: registry,
            llm,
            vault,
            credentials,
            #[cfg(feature = "prometheus")]
            metrics,
        },
        config,
    })
}
