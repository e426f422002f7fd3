//! Capture → diff → verdict pipeline.
//!
//! [`RunOrchestrator`] fans a test run out into snapshots and capture
//! jobs; [`CaptureService`] drives the browser; [`CompareEngine`] turns
//! captured bytes into comparisons and run outcomes. [`Pipeline`] is the
//! job-queue handler tying the stages together.

pub mod capture;
pub mod compare;
pub mod error;
pub mod jobs;
pub mod runs;

use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::{error, warn},
    vision_browser::KeyedPools,
    vision_store::{BlobStore, Store},
};

pub use {
    capture::CaptureService,
    compare::CompareEngine,
    error::{Error as PipelineError, Result},
    jobs::{Job, JobHandler, JobQueue, RecordingJobQueue, TokioJobQueue},
    runs::{RunContext, RunOrchestrator},
};

/// The pipeline as a job handler: a capture job captures and then
/// immediately compares; a compare job compares an already-captured
/// snapshot.
pub struct Pipeline {
    store: Store,
    capture: CaptureService,
    compare: CompareEngine,
}

impl Pipeline {
    pub fn new(store: Store, blobs: Arc<dyn BlobStore>, pools: Arc<KeyedPools>) -> Self {
        Self {
            capture: CaptureService::new(store.clone(), blobs.clone(), pools),
            compare: CompareEngine::new(store.clone(), blobs),
            store,
        }
    }

    pub fn compare_engine(&self) -> &CompareEngine {
        &self.compare
    }

    pub fn capture_service(&self) -> &CaptureService {
        &self.capture
    }

    async fn capture_then_compare(&self, snapshot_id: &str) {
        match self.capture.capture_snapshot(snapshot_id).await {
            Ok(_) => {
                if let Err(e) = self.compare.run_comparison(snapshot_id, None).await {
                    error!(snapshot_id, error = %e, "comparison failed");
                }
            },
            Err(e) => {
                warn!(snapshot_id, error = %e, "capture failed, recording error comparison");

                #[cfg(feature = "metrics")]
                vision_metrics::counter!(vision_metrics::capture::FAILURES_TOTAL).increment(1);

                // Convert the failure into an error verdict so the run can
                // still terminate.
                match self.store.snapshots().get(snapshot_id).await {
                    Ok(snapshot) => {
                        let threshold = self
                            .compare
                            .project_threshold(&snapshot)
                            .await
                            .unwrap_or(0.01);
                        if let Err(record_err) = self
                            .compare
                            .record_error(&snapshot, threshold, &e.to_string())
                            .await
                        {
                            error!(snapshot_id, error = %record_err, "failed to record capture error");
                        }
                    },
                    Err(load_err) => {
                        error!(snapshot_id, error = %load_err, "capture failed for unknown snapshot");
                    },
                }
            },
        }
    }
}

#[async_trait]
impl JobHandler for Pipeline {
    async fn handle(&self, job: Job) {
        match job {
            Job::Capture { snapshot_id } => self.capture_then_compare(&snapshot_id).await,
            Job::Compare { snapshot_id } => {
                if let Err(e) = self.compare.run_comparison(&snapshot_id, None).await {
                    error!(snapshot_id, error = %e, "comparison failed");
                }
            },
            Job::RunAiTask { task_id } => {
                // AI tasks are executed by the task executor's handler.
                warn!(task_id, "pipeline received an AI task job it does not handle");
            },
        }
    }
}
