//! Test-run aggregates.
//!
//! Counters are incremented with atomic SQL updates; the completion check
//! reads the fresh counters inside the same transaction so two concurrent
//! comparison results cannot both drive the run terminal.

use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{TestRun, TestRunStatus},
};

pub struct TestRunStore {
    pool: SqlitePool,
}

/// Which counter a finished comparison lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed,
    Error,
}

impl RunOutcome {
    fn column(&self) -> &'static str {
        match self {
            Self::Passed => "passed_count",
            Self::Failed => "failed_count",
            Self::Error => "error_count",
        }
    }
}

#[derive(sqlx::FromRow)]
struct TestRunRow {
    id: String,
    project_id: String,
    status: String,
    branch: String,
    commit_sha: Option<String>,
    environment: Option<String>,
    total_pages: i64,
    passed_count: i64,
    failed_count: i64,
    pending_count: i64,
    error_count: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    duration_ms: Option<i64>,
    created_at: i64,
}

impl TryFrom<TestRunRow> for TestRun {
    type Error = Error;

    fn try_from(r: TestRunRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            project_id: r.project_id,
            status: TestRunStatus::parse(&r.status)?,
            branch: r.branch,
            commit_sha: r.commit_sha,
            environment: r.environment,
            total_pages: r.total_pages,
            passed_count: r.passed_count,
            failed_count: r.failed_count,
            pending_count: r.pending_count,
            error_count: r.error_count,
            started_at: r.started_at,
            completed_at: r.completed_at,
            duration_ms: r.duration_ms,
            created_at: r.created_at,
        })
    }
}

const SELECT: &str = "SELECT id, project_id, status, branch, commit_sha, environment,
                             total_pages, passed_count, failed_count, pending_count,
                             error_count, started_at, completed_at, duration_ms, created_at
                      FROM test_runs";

impl TestRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        project_id: &str,
        branch: &str,
        commit_sha: Option<&str>,
        environment: Option<&str>,
    ) -> Result<TestRun> {
        let run = TestRun {
            id: vision_common::new_id(),
            project_id: project_id.to_string(),
            status: TestRunStatus::Pending,
            branch: branch.to_string(),
            commit_sha: commit_sha.map(str::to_string),
            environment: environment.map(str::to_string),
            total_pages: 0,
            passed_count: 0,
            failed_count: 0,
            pending_count: 0,
            error_count: 0,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO test_runs (id, project_id, status, branch, commit_sha,
                                    environment, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.project_id)
        .bind(run.status.as_str())
        .bind(&run.branch)
        .bind(&run.commit_sha)
        .bind(&run.environment)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    pub async fn get(&self, id: &str) -> Result<TestRun> {
        let row: Option<TestRunRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("test_run", id))?.try_into()
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<TestRun>> {
        let rows: Vec<TestRunRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE project_id = ? ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// pending → running with the capture matrix size. A run over an empty
    /// matrix is terminal immediately, as passed.
    pub async fn start(&self, id: &str, total_pages: i64) -> Result<TestRun> {
        let now = now_ms();

        if total_pages == 0 {
            let result = sqlx::query(
                "UPDATE test_runs
                 SET status = 'passed', total_pages = 0, started_at = ?,
                     completed_at = ?, duration_ms = 0
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(Error::Conflict(format!("test run {id} is not pending")));
            }
            return self.get(id).await;
        }

        let result = sqlx::query(
            "UPDATE test_runs
             SET status = 'running', total_pages = ?, pending_count = ?, started_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(total_pages)
        .bind(total_pages)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!("test run {id} is not pending")));
        }
        self.get(id).await
    }

    /// Record one comparison outcome and, when every capture is accounted
    /// for, drive the run terminal. Returns the final status when this call
    /// was the one that completed the run.
    pub async fn record_outcome(&self, id: &str, outcome: RunOutcome) -> Result<Option<TestRunStatus>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&format!(
            "UPDATE test_runs
             SET {col} = {col} + 1,
                 pending_count = MAX(pending_count - 1, 0)
             WHERE id = ?",
            col = outcome.column()
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::not_found("test_run", id));
        }

        let (status, total, passed, failed, errors, started_at): (String, i64, i64, i64, i64, Option<i64>) =
            sqlx::query_as(
                "SELECT status, total_pages, passed_count, failed_count, error_count, started_at
                 FROM test_runs WHERE id = ?",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        let mut completed = None;
        if status == TestRunStatus::Running.as_str() && passed + failed + errors >= total {
            let final_status = if errors > 0 {
                TestRunStatus::Error
            } else if failed > 0 {
                TestRunStatus::Failed
            } else {
                TestRunStatus::Passed
            };

            let now = now_ms();
            let duration = started_at.map(|s| now - s).unwrap_or(0);
            sqlx::query(
                "UPDATE test_runs
                 SET status = ?, completed_at = ?, duration_ms = ?
                 WHERE id = ? AND status = 'running'",
            )
            .bind(final_status.as_str())
            .bind(now)
            .bind(duration)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            completed = Some(final_status);
        }

        tx.commit().await?;

        if let Some(final_status) = completed {
            tracing::info!(run_id = id, status = %final_status, "test run completed");
        }

        Ok(completed)
    }

    /// Review flow: an approved failure moves one unit failed → passed.
    /// Counters never re-fire completion on a terminal run.
    pub async fn shift_failed_to_passed(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE test_runs
             SET failed_count = failed_count - 1, passed_count = passed_count + 1
             WHERE id = ? AND failed_count > 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "test run {id} has no failed captures to approve"
            )));
        }

        // A fully-approved failed run reads as passed afterwards.
        sqlx::query(
            "UPDATE test_runs SET status = 'passed'
             WHERE id = ? AND status = 'failed' AND failed_count = 0 AND error_count = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
