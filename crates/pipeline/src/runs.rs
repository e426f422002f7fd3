//! Test-run orchestration: build the page × profile matrix, create the
//! pending snapshots, and hand capture work to the job queue.

use std::sync::Arc;

use {
    tracing::info,
    vision_store::{
        Store,
        models::{NewSnapshotContext, TestRun},
    },
};

use crate::{
    error::Result,
    jobs::{Job, JobQueue},
};

pub struct RunOrchestrator {
    store: Store,
    queue: Arc<dyn JobQueue>,
}

/// Branch/commit context for a run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub environment: Option<String>,
}

impl RunOrchestrator {
    pub fn new(store: Store, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Create and start a run over every enabled page × enabled profile.
    ///
    /// Each cell gets a pending snapshot and a queued capture job. An
    /// empty matrix short-circuits to `passed`.
    pub async fn start_run(&self, project_id: &str, context: RunContext) -> Result<TestRun> {
        let branch = context.branch.as_deref().unwrap_or("main");

        let run = self
            .store
            .test_runs()
            .create(
                project_id,
                branch,
                context.commit_sha.as_deref(),
                context.environment.as_deref(),
            )
            .await?;

        let pages = self.store.pages().list_enabled(project_id).await?;
        let profiles = self.store.profiles().list_enabled(project_id).await?;
        let total = (pages.len() * profiles.len()) as i64;

        let run = self.store.test_runs().start(&run.id, total).await?;
        if total == 0 {
            info!(run_id = run.id, "empty capture matrix, run passed immediately");
            return Ok(run);
        }

        for page in &pages {
            for profile in &profiles {
                let snapshot = self
                    .store
                    .snapshots()
                    .create(
                        &page.id,
                        &profile.id,
                        NewSnapshotContext {
                            test_run_id: Some(run.id.clone()),
                            branch: branch.to_string(),
                            commit_sha: context.commit_sha.clone(),
                            environment: context.environment.clone(),
                        },
                    )
                    .await?;

                self.queue.enqueue(Job::Capture {
                    snapshot_id: snapshot.id,
                });
            }
        }

        info!(
            run_id = run.id,
            pages = pages.len(),
            profiles = profiles.len(),
            total,
            "test run started"
        );
        Ok(run)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use vision_store::{
        models::{ProjectSettings, TestRunStatus},
        pages::NewPage,
        profiles::NewBrowserProfile,
    };

    use super::*;
    use crate::jobs::RecordingJobQueue;

    async fn fixture() -> (Store, String) {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        vision_store::init_schema(&pool).await.unwrap();
        let store = Store::new(pool);
        let project = store.projects().create("p", ProjectSettings::default()).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn matrix_spawns_one_capture_per_cell() {
        let (store, project_id) = fixture().await;
        for slug in ["home", "pricing"] {
            store
                .pages()
                .create(
                    &project_id,
                    NewPage {
                        slug: slug.into(),
                        url_path: format!("/{slug}"),
                        enabled: true,
                        settings: Default::default(),
                    },
                )
                .await
                .unwrap();
        }
        for (name, width) in [("desktop", 1920u32), ("mobile", 390)] {
            store
                .profiles()
                .create(
                    &project_id,
                    NewBrowserProfile {
                        name: name.into(),
                        width,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let queue = Arc::new(RecordingJobQueue::default());
        let orchestrator = RunOrchestrator::new(store.clone(), queue.clone());

        let run = orchestrator
            .start_run(&project_id, RunContext::default())
            .await
            .unwrap();

        assert_eq!(run.status, TestRunStatus::Running);
        assert_eq!(run.total_pages, 4);
        assert_eq!(run.pending_count, 4);
        assert_eq!(queue.len(), 4);
        assert_eq!(store.snapshots().list_for_run(&run.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn empty_matrix_passes_immediately() {
        let (store, project_id) = fixture().await;
        let queue = Arc::new(RecordingJobQueue::default());
        let orchestrator = RunOrchestrator::new(store, queue.clone());

        let run = orchestrator
            .start_run(&project_id, RunContext::default())
            .await
            .unwrap();

        assert_eq!(run.status, TestRunStatus::Passed);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn disabled_pages_are_excluded_from_the_matrix() {
        let (store, project_id) = fixture().await;
        store
            .pages()
            .create(
                &project_id,
                NewPage {
                    slug: "hidden".into(),
                    url_path: "/hidden".into(),
                    enabled: false,
                    settings: Default::default(),
                },
            )
            .await
            .unwrap();
        store
            .profiles()
            .create(&project_id, NewBrowserProfile::default())
            .await
            .unwrap();

        let queue = Arc::new(RecordingJobQueue::default());
        let orchestrator = RunOrchestrator::new(store, queue.clone());
        let run = orchestrator
            .start_run(&project_id, RunContext::default())
            .await
            .unwrap();

        // One profile but zero enabled pages: empty matrix.
        assert_eq!(run.status, TestRunStatus::Passed);
        assert_eq!(run.total_pages, 0);
    }
}
