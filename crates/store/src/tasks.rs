use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{AiTask, TaskStatus, TaskStep},
};

pub struct TaskStore {
    pool: SqlitePool,
}

/// Creation parameters for an AI task.
#[derive(Debug, Clone)]
pub struct NewAiTask {
    pub instruction: String,
    pub start_url: Option<String>,
    pub model: String,
    pub browser_provider: String,
    pub max_steps: i64,
    pub timeout_seconds: i64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub capture_screenshots: bool,
}

impl Default for NewAiTask {
    fn default() -> Self {
        Self {
            instruction: String::new(),
            start_url: None,
            model: "claude-sonnet-4".into(),
            browser_provider: "local".into(),
            max_steps: 20,
            timeout_seconds: 300,
            viewport_width: 1280,
            viewport_height: 720,
            capture_screenshots: true,
        }
    }
}

/// One executed step, recorded after the action ran.
#[derive(Debug, Clone, Default)]
pub struct NewTaskStep {
    pub action: String,
    pub selector: Option<String>,
    pub value: Option<String>,
    pub action_data: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub url_before: Option<String>,
    pub url_after: Option<String>,
    pub reasoning: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub screenshot_key: Option<String>,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    project_id: String,
    instruction: String,
    start_url: Option<String>,
    model: String,
    browser_provider: String,
    max_steps: i64,
    timeout_seconds: i64,
    viewport_width: i64,
    viewport_height: i64,
    capture_screenshots: i64,
    status: String,
    steps_executed: i64,
    input_tokens: i64,
    output_tokens: i64,
    stop_requested: i64,
    result: Option<String>,
    error_message: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl TryFrom<TaskRow> for AiTask {
    type Error = Error;

    fn try_from(r: TaskRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            project_id: r.project_id,
            instruction: r.instruction,
            start_url: r.start_url,
            model: r.model,
            browser_provider: r.browser_provider,
            max_steps: r.max_steps,
            timeout_seconds: r.timeout_seconds,
            viewport_width: r.viewport_width as u32,
            viewport_height: r.viewport_height as u32,
            capture_screenshots: r.capture_screenshots != 0,
            status: TaskStatus::parse(&r.status)?,
            steps_executed: r.steps_executed,
            input_tokens: r.input_tokens,
            output_tokens: r.output_tokens,
            stop_requested: r.stop_requested != 0,
            result: r.result,
            error_message: r.error_message,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    task_id: String,
    position: i64,
    action: String,
    selector: Option<String>,
    value: Option<String>,
    action_data: Option<String>,
    success: i64,
    error: Option<String>,
    duration_ms: i64,
    url_before: Option<String>,
    url_after: Option<String>,
    reasoning: Option<String>,
    input_tokens: i64,
    output_tokens: i64,
    screenshot_key: Option<String>,
    created_at: i64,
}

impl TryFrom<StepRow> for TaskStep {
    type Error = Error;

    fn try_from(r: StepRow) -> Result<Self> {
        let action_data = r
            .action_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|source| Error::Corrupt {
                column: "task_steps.action_data",
                source,
            })?;
        Ok(Self {
            id: r.id,
            task_id: r.task_id,
            position: r.position,
            action: r.action,
            selector: r.selector,
            value: r.value,
            action_data,
            success: r.success != 0,
            error: r.error,
            duration_ms: r.duration_ms,
            url_before: r.url_before,
            url_after: r.url_after,
            reasoning: r.reasoning,
            input_tokens: r.input_tokens,
            output_tokens: r.output_tokens,
            screenshot_key: r.screenshot_key,
            created_at: r.created_at,
        })
    }
}

const SELECT_TASK: &str =
    "SELECT id, project_id, instruction, start_url, model, browser_provider,
            max_steps, timeout_seconds, viewport_width, viewport_height,
            capture_screenshots, status, steps_executed, input_tokens,
            output_tokens, stop_requested, result, error_message,
            created_at, started_at, completed_at
     FROM ai_tasks";

const SELECT_STEP: &str =
    "SELECT id, task_id, position, action, selector, value, action_data,
            success, error, duration_ms, url_before, url_after, reasoning,
            input_tokens, output_tokens, screenshot_key, created_at
     FROM task_steps";

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, project_id: &str, new: NewAiTask) -> Result<AiTask> {
        if new.instruction.trim().is_empty() {
            return Err(Error::invalid("instruction", "must not be empty"));
        }
        if new.max_steps <= 0 {
            return Err(Error::invalid("max_steps", "must be positive"));
        }

        let task = AiTask {
            id: vision_common::new_id(),
            project_id: project_id.to_string(),
            instruction: new.instruction,
            start_url: new.start_url,
            model: new.model,
            browser_provider: new.browser_provider,
            max_steps: new.max_steps,
            timeout_seconds: new.timeout_seconds,
            viewport_width: new.viewport_width,
            viewport_height: new.viewport_height,
            capture_screenshots: new.capture_screenshots,
            status: TaskStatus::Pending,
            steps_executed: 0,
            input_tokens: 0,
            output_tokens: 0,
            stop_requested: false,
            result: None,
            error_message: None,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO ai_tasks
             (id, project_id, instruction, start_url, model, browser_provider,
              max_steps, timeout_seconds, viewport_width, viewport_height,
              capture_screenshots, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.project_id)
        .bind(&task.instruction)
        .bind(&task.start_url)
        .bind(&task.model)
        .bind(&task.browser_provider)
        .bind(task.max_steps)
        .bind(task.timeout_seconds)
        .bind(task.viewport_width as i64)
        .bind(task.viewport_height as i64)
        .bind(task.capture_screenshots as i64)
        .bind(task.status.as_str())
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;

        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<AiTask> {
        let row: Option<TaskRow> = sqlx::query_as(&format!("{SELECT_TASK} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("ai_task", id))?.try_into()
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<AiTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "{SELECT_TASK} WHERE project_id = ? ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn mark_running(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ai_tasks SET status = 'running', started_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!("ai task {id} is not pending")));
        }
        Ok(())
    }

    /// Append a step at the next position and roll its tokens up onto the
    /// task, in one transaction so `steps_executed` always matches the
    /// number of recorded steps.
    pub async fn record_step(&self, task_id: &str, step: NewTaskStep) -> Result<TaskStep> {
        let mut tx = self.pool.begin().await?;

        let (position,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM task_steps WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;

        let recorded = TaskStep {
            id: vision_common::new_id(),
            task_id: task_id.to_string(),
            position,
            action: step.action,
            selector: step.selector,
            value: step.value,
            action_data: step.action_data,
            success: step.success,
            error: step.error,
            duration_ms: step.duration_ms,
            url_before: step.url_before,
            url_after: step.url_after,
            reasoning: step.reasoning,
            input_tokens: step.input_tokens,
            output_tokens: step.output_tokens,
            screenshot_key: step.screenshot_key,
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO task_steps
             (id, task_id, position, action, selector, value, action_data, success,
              error, duration_ms, url_before, url_after, reasoning, input_tokens,
              output_tokens, screenshot_key, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&recorded.id)
        .bind(&recorded.task_id)
        .bind(recorded.position)
        .bind(&recorded.action)
        .bind(&recorded.selector)
        .bind(&recorded.value)
        .bind(
            recorded
                .action_data
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "{}".into())),
        )
        .bind(recorded.success as i64)
        .bind(&recorded.error)
        .bind(recorded.duration_ms)
        .bind(&recorded.url_before)
        .bind(&recorded.url_after)
        .bind(&recorded.reasoning)
        .bind(recorded.input_tokens)
        .bind(recorded.output_tokens)
        .bind(&recorded.screenshot_key)
        .bind(recorded.created_at)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE ai_tasks
             SET steps_executed = steps_executed + 1,
                 input_tokens = input_tokens + ?,
                 output_tokens = output_tokens + ?
             WHERE id = ?",
        )
        .bind(recorded.input_tokens)
        .bind(recorded.output_tokens)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::not_found("ai_task", task_id));
        }

        tx.commit().await?;
        Ok(recorded)
    }

    pub async fn steps(&self, task_id: &str) -> Result<Vec<TaskStep>> {
        let rows: Vec<StepRow> =
            sqlx::query_as(&format!("{SELECT_STEP} WHERE task_id = ? ORDER BY position"))
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn set_step_screenshot(&self, step_id: &str, key: &str) -> Result<()> {
        let result = sqlx::query("UPDATE task_steps SET screenshot_key = ? WHERE id = ?")
            .bind(key)
            .bind(step_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("task_step", step_id));
        }
        Ok(())
    }

    /// Cooperative cancellation flag, honored at the next loop iteration.
    pub async fn request_stop(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE ai_tasks SET stop_requested = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("ai_task", id));
        }
        Ok(())
    }

    pub async fn is_stop_requested(&self, id: &str) -> Result<bool> {
        let (flag,): (i64,) = sqlx::query_as("SELECT stop_requested FROM ai_tasks WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(flag != 0)
    }

    /// Drive the task to a terminal state. Non-terminal targets are a
    /// programming error at the call site.
    pub async fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::invalid("status", "finish requires a terminal status"));
        }

        let updated = sqlx::query(
            "UPDATE ai_tasks
             SET status = ?, result = ?, error_message = ?, completed_at = ?
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(status.as_str())
        .bind(result)
        .bind(error_message)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::Conflict(format!("ai task {id} already terminal")));
        }
        Ok(())
    }
}
