//! Background job seam.
//!
//! Work that must not run on a request thread goes through [`JobQueue`].
//! `enqueue` is the single point where the asynchronous-execution policy
//! is enforced; nothing else in the codebase spawns pipeline work.

use std::sync::Arc;

use {async_trait::async_trait, serde::{Deserialize, Serialize}, tracing::error};

/// A unit of deferred pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Capture a pending snapshot, then compare it.
    Capture { snapshot_id: String },
    /// Compare an already-captured snapshot against its baseline.
    Compare { snapshot_id: String },
    /// Run an AI task to completion.
    RunAiTask { task_id: String },
}

/// Executes one job. Implemented by the pipeline facade (and by the AI
/// executor for task jobs).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job);
}

/// Hands jobs to the runtime. Implementations decide where work runs;
/// callers only ever enqueue.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job);
}

/// Production queue: every job becomes a detached task on the runtime.
/// Handlers are infallible at this boundary; failures are their own to
/// record against the affected entity.
pub struct TokioJobQueue {
    handler: Arc<dyn JobHandler>,
}

impl TokioJobQueue {
    pub fn new(handler: Arc<dyn JobHandler>) -> Self {
        Self { handler }
    }
}

impl JobQueue for TokioJobQueue {
    fn enqueue(&self, job: Job) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            handler.handle(job).await;
        });
    }
}

/// Test queue: jobs accumulate until drained explicitly, keeping tests
/// deterministic.
#[derive(Default)]
pub struct RecordingJobQueue {
    jobs: std::sync::Mutex<Vec<Job>>,
}

impl RecordingJobQueue {
    pub fn drain(&self) -> Vec<Job> {
        match self.jobs.lock() {
            Ok(mut jobs) => std::mem::take(&mut *jobs),
            Err(e) => {
                error!(error = %e, "job queue mutex poisoned");
                Vec::new()
            },
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobQueue for RecordingJobQueue {
    fn enqueue(&self, job: Job) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job);
        }
    }
}
