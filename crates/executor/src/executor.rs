//! The observe → decide → act loop.
//!
//! A task owns one browser session for its whole life. Each iteration
//! screenshots the page, asks the model for the next action against the
//! extracted element refs, performs it with bounded retries, and records a
//! step. Screenshots and cacheable actions are flushed in batches rather
//! than per step. Every exit path lands the task in a terminal state.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    tracing::{info, warn},
    vision_browser::{BrowserAction, BrowserCapability, BrowserRegistry, ScrollDirection,
        SessionSpec, Viewport, WorkerPool},
    vision_llm::{ImageData, LlmProvider, LlmResolver},
    vision_store::{
        BlobStore, Store,
        action_cache::CacheableAction,
        models::{AiTask, TaskStatus},
        tasks::NewTaskStep,
    },
};

use crate::{
    cleaner,
    decision::{ActionKind, Decision, decode},
    error::{Error, Result},
    prompt::{StepSummary, build_prompt},
    session::{TaskHook, needs_start_url_revisit},
};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Retries per browser action after the first attempt.
    pub max_retries_per_action: usize,
    /// Consecutive failed steps before the task is abandoned.
    pub max_consecutive_failures: u32,
    /// Steps between side-effect flushes.
    pub flush_every: i64,
    /// Steps between page-cleaner passes.
    pub cleaner_every: i64,
    /// Pause between loop iterations.
    pub step_delay: Duration,
    /// Pause between retries of a failed action.
    pub action_retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries_per_action: 2,
            max_consecutive_failures: 5,
            flush_every: 5,
            cleaner_every: 10,
            step_delay: Duration::from_millis(300),
            action_retry_delay: Duration::from_millis(500),
        }
    }
}

/// How the main loop ended; mapped onto the task's terminal state by
/// [`TaskExecutor::execute`].
#[derive(Debug)]
enum Termination {
    Completed(String),
    Stopped,
    MaxSteps(i64),
    Failed(String),
}

/// In-memory loop state: prompt history and the batched side effects
/// awaiting flush.
#[derive(Default)]
struct LoopState {
    history: Vec<StepSummary>,
    pending_screenshots: Vec<(String, Vec<u8>)>,
    pending_actions: Vec<CacheableAction>,
    consecutive_failures: u32,
}

pub struct TaskExecutor {
    store: Store,
    blobs: Arc<dyn BlobStore>,
    llm_factory: Arc<dyn LlmResolver>,
    browsers: Arc<BrowserRegistry>,
    /// Shared pre-warmed pool. Tasks on the local provider run against a
    /// pool worker when one is configured; other providers get their own
    /// session.
    pool: Option<Arc<WorkerPool>>,
    hook: Option<Arc<dyn TaskHook>>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        store: Store,
        blobs: Arc<dyn BlobStore>,
        llm_factory: Arc<dyn LlmResolver>,
        browsers: Arc<BrowserRegistry>,
    ) -> Self {
        Self {
            store,
            blobs,
            llm_factory,
            browsers,
            pool: None,
            hook: None,
            config: ExecutorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn TaskHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run a task to a terminal state. The session is closed on every exit
    /// path; pending side effects are flushed before the status flips.
    pub async fn execute(&self, task_id: &str) -> Result<AiTask> {
        let task = self.store.tasks().get(task_id).await?;
        let llm = self.llm_factory.resolve(&task.model)?;
        let browser = self.browsers.get(&task.browser_provider)?;

        self.store.tasks().mark_running(task_id).await?;

        let viewport = Viewport {
            width: task.viewport_width,
            height: task.viewport_height,
        };

        let mut state = LoopState::default();
        let deadline = Duration::from_secs(task.timeout_seconds.max(1) as u64);

        // Local tasks ride a pre-warmed pool worker when one is wired in;
        // everything else gets its own session.
        let shared_pool = self
            .pool
            .clone()
            .filter(|_| task.browser_provider == "local");

        let mut owned_session = None;
        let outcome = match shared_pool {
            Some(pool) => {
                let task_ref = &task;
                let llm_ref = llm.as_ref();
                let state_ref = &mut state;
                tokio::time::timeout(deadline, async move {
                    let checked_out = pool
                        .with_worker(move |worker| async move {
                            // Contexts keep their viewport; reconfigure
                            // lazily when the task wants a different one.
                            worker
                                .capability
                                .set_viewport(&worker.session_id, viewport)
                                .await?;
                            Ok(self
                                .run_loop(
                                    task_ref,
                                    llm_ref,
                                    &worker.capability,
                                    &worker.session_id,
                                    state_ref,
                                )
                                .await)
                        })
                        .await;
                    match checked_out {
                        Ok(loop_result) => loop_result,
                        Err(e) => Err(Error::Browser(e)),
                    }
                })
                .await
            },
            None => {
                let spec = SessionSpec {
                    viewport,
                    ..Default::default()
                };
                let session_id = browser.create_session(&spec).await?;
                owned_session = Some(session_id.clone());

                tokio::time::timeout(
                    deadline,
                    self.run_loop(&task, llm.as_ref(), &browser, &session_id, &mut state),
                )
                .await
            },
        };

        // Flush whatever the loop accumulated, then settle the status.
        self.flush(&task, &mut state).await;

        let finished = match outcome {
            Ok(Ok(Termination::Completed(result))) => {
                self.finish(task_id, TaskStatus::Completed, Some(&result), None).await
            },
            Ok(Ok(Termination::MaxSteps(max))) => {
                let result = format!("Reached maximum steps ({max})");
                self.finish(task_id, TaskStatus::Completed, Some(&result), None).await
            },
            Ok(Ok(Termination::Stopped)) => {
                self.finish(task_id, TaskStatus::Stopped, None, None).await
            },
            Ok(Ok(Termination::Failed(message))) => {
                self.finish(task_id, TaskStatus::Error, None, Some(&message)).await
            },
            Ok(Err(e)) => {
                self.finish(task_id, TaskStatus::Error, None, Some(&e.to_string())).await
            },
            Err(_elapsed) => {
                let message = format!("timed out after {}s", task.timeout_seconds);
                self.finish(task_id, TaskStatus::Timeout, None, Some(&message)).await
            },
        };

        // Owned sessions close here; pool workers were reset and returned
        // at checkin.
        if let Some(session_id) = owned_session
            && let Err(e) = browser.close_session(&session_id).await
        {
            warn!(task_id, error = %e, "failed to close task session");
        }

        finished?;

        #[cfg(feature = "metrics")]
        vision_metrics::counter!(vision_metrics::executor::TASKS_COMPLETED_TOTAL)
            .increment(1);

        self.store.tasks().get(task_id).await.map_err(Error::from)
    }

    async fn run_loop(
        &self,
        task: &AiTask,
        llm: &dyn LlmProvider,
        browser: &Arc<dyn BrowserCapability>,
        session_id: &str,
        state: &mut LoopState,
    ) -> Result<Termination> {
        // Stage the session: start URL, overlay cleanup, login hook, and a
        // post-login return to the start URL if a redirect moved us.
        if let Some(start_url) = task.start_url.as_deref()
            && let Err(e) = browser.navigate(session_id, start_url).await
        {
            warn!(task_id = task.id, error = %e, "initial navigation failed, continuing");
        }
        cleaner::run(browser, session_id).await;

        if let Some(hook) = &self.hook {
            hook.before_execute(browser, session_id, task).await;
        }

        if let Some(start_url) = task.start_url.as_deref() {
            let current = browser.current_url(session_id).await.unwrap_or_default();
            if needs_start_url_revisit(&current, start_url) {
                if let Err(e) = browser.navigate(session_id, start_url).await {
                    warn!(task_id = task.id, error = %e, "start URL revisit failed");
                }
            }
        }
        cleaner::run(browser, session_id).await;

        for step in 0..task.max_steps {
            if self.store.tasks().is_stop_requested(&task.id).await? {
                info!(task_id = task.id, step, "stop requested, halting");
                return Ok(Termination::Stopped);
            }

            // Observe.
            let screenshot = browser.screenshot(session_id, false).await?;
            let extraction = browser.extract_elements(session_id).await?;
            let url_before = browser.current_url(session_id).await.unwrap_or_default();
            let title = browser.current_title(session_id).await.unwrap_or_default();

            // Decide.
            let prompt = build_prompt(
                &task.instruction,
                &url_before,
                &title,
                step,
                task.max_steps,
                &state.history,
                &extraction,
            );

            let (decision, usage) = match llm
                .analyze_image(ImageData::from_bytes(&screenshot), &prompt)
                .await
            {
                Ok(response) => {
                    let raw = response.text.unwrap_or_default();
                    let decision = match decode(&raw) {
                        Ok(decision) => decision,
                        Err(e) => {
                            warn!(task_id = task.id, step, error = %e, "undecodable decision, waiting");
                            Decision::fallback()
                        },
                    };
                    (decision, response.usage)
                },
                Err(e) => {
                    warn!(task_id = task.id, step, error = %e, "LLM call failed, waiting");
                    (Decision::fallback(), Default::default())
                },
            };

            // Resolve the element reference to screen coordinates.
            let resolved = decision
                .action
                .ref_token
                .as_deref()
                .and_then(|token| extraction.resolve(token));
            if decision.action.ref_token.is_some() && resolved.is_none() {
                warn!(
                    task_id = task.id,
                    step,
                    ref_token = decision.action.ref_token.as_deref().unwrap_or(""),
                    "decision references an unknown element"
                );
            }
            let coordinates = resolved.map(|e| (e.x, e.y));
            let target_text = resolved.and_then(|e| e.text.clone());

            // Terminate?
            if decision.complete {
                let result = decision
                    .result
                    .clone()
                    .unwrap_or_else(|| "Task completed".to_string());
                info!(task_id = task.id, step, "model declared completion");
                return Ok(Termination::Completed(result));
            }

            // Act.
            let started = Instant::now();
            let action_error = self
                .act(browser, session_id, &decision, coordinates)
                .await
                .err();
            let duration_ms = started.elapsed().as_millis() as i64;
            let success = action_error.is_none();
            let url_after = browser.current_url(session_id).await.unwrap_or_default();

            let action_data = serde_json::json!({
                "ref": decision.action.ref_token,
                "coordinates": coordinates.map(|(x, y)| serde_json::json!({"x": x, "y": y})),
                "value": decision.action.value,
            });

            let recorded = self
                .store
                .tasks()
                .record_step(
                    &task.id,
                    NewTaskStep {
                        action: decision.action.kind.as_str().to_string(),
                        selector: decision.action.selector.clone(),
                        value: decision.action.value.clone(),
                        action_data: Some(action_data.clone()),
                        success,
                        error: action_error.clone(),
                        duration_ms,
                        url_before: Some(url_before.clone()),
                        url_after: Some(url_after),
                        reasoning: Some(decision.thinking.clone()),
                        input_tokens: i64::from(usage.input_tokens),
                        output_tokens: i64::from(usage.output_tokens),
                        screenshot_key: None,
                    },
                )
                .await?;

            #[cfg(feature = "metrics")]
            vision_metrics::counter!(vision_metrics::executor::STEPS_TOTAL).increment(1);

            // Keep a compact step record in memory so prompt construction
            // never refetches from the store.
            state.history.push(StepSummary {
                action: decision.action.kind.as_str().to_string(),
                target: decision
                    .action
                    .ref_token
                    .clone()
                    .or_else(|| decision.action.selector.clone())
                    .or(target_text),
                success,
            });

            // Queue batched side effects.
            if task.capture_screenshots {
                state.pending_screenshots.push((recorded.id.clone(), screenshot));
            }
            if success
                && matches!(decision.action.kind, ActionKind::Click | ActionKind::Type)
            {
                state.pending_actions.push(CacheableAction {
                    url: url_before,
                    action_type: decision.action.kind.as_str().to_string(),
                    action_data,
                });
            }

            // Accounting.
            if success {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.max_consecutive_failures {
                    return Ok(Termination::Failed(format!(
                        "{} consecutive action failures",
                        state.consecutive_failures
                    )));
                }
            }

            let completed_steps = step + 1;
            if completed_steps % self.config.flush_every == 0 {
                self.flush(task, state).await;
            }
            if completed_steps % self.config.cleaner_every == 0 {
                cleaner::run(browser, session_id).await;
            }

            tokio::time::sleep(self.config.step_delay).await;
        }

        Ok(Termination::MaxSteps(task.max_steps))
    }

    /// Perform the decided action with bounded retries. Click prefers the
    /// resolved coordinates; typing against a ref clicks it first so the
    /// keystrokes land in focus.
    async fn act(
        &self,
        browser: &Arc<dyn BrowserCapability>,
        session_id: &str,
        decision: &Decision,
        coordinates: Option<(f64, f64)>,
    ) -> std::result::Result<(), String> {
        let actions = plan_actions(decision, coordinates)?;

        for action in &actions {
            let mut attempt = 0;
            loop {
                match browser.perform_action(session_id, action).await {
                    Ok(()) => break,
                    Err(e) if attempt < self.config.max_retries_per_action => {
                        attempt += 1;
                        warn!(action = %action, attempt, error = %e, "action retrying");
                        tokio::time::sleep(self.config.action_retry_delay).await;
                    },
                    Err(e) => return Err(e.to_string()),
                }
            }
        }
        Ok(())
    }

    /// Store queued screenshots and push cacheable actions into the action
    /// cache, one batch per flush.
    async fn flush(&self, task: &AiTask, state: &mut LoopState) {
        for (step_id, png) in state.pending_screenshots.drain(..) {
            let key = format!("tasks/{}/steps/{step_id}.png", task.id);
            match self.blobs.put(&key, png, "image/png").await {
                Ok(()) => {
                    if let Err(e) = self.store.tasks().set_step_screenshot(&step_id, &key).await {
                        warn!(step_id, error = %e, "failed to attach step screenshot");
                    }
                },
                Err(e) => warn!(step_id, error = %e, "failed to store step screenshot"),
            }
        }

        if !state.pending_actions.is_empty() {
            let actions = std::mem::take(&mut state.pending_actions);
            if let Err(e) = self
                .store
                .action_cache()
                .batch_store(&task.project_id, &actions, Some(&task.instruction))
                .await
            {
                warn!(task_id = task.id, error = %e, "action cache batch store failed");
            }
        }
    }

    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        match self.store.tasks().finish(task_id, status, result, error_message).await {
            Ok(()) => Ok(()),
            // A concurrent stop already landed the task; keep that state.
            Err(vision_store::StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Translate a decision into the browser actions that realize it.
pub fn plan_actions(
    decision: &Decision,
    coordinates: Option<(f64, f64)>,
) -> std::result::Result<Vec<BrowserAction>, String> {
    match decision.action.kind {
        ActionKind::Click => match (coordinates, decision.action.selector.clone()) {
            (Some((x, y)), _) => Ok(vec![BrowserAction::ClickAt { x, y }]),
            (None, Some(selector)) => Ok(vec![BrowserAction::Click {
                selector: Some(selector),
                x: None,
                y: None,
            }]),
            (None, None) => Err("click needs a resolvable ref or a selector".into()),
        },
        ActionKind::Type => {
            let text = decision.action.value.clone().unwrap_or_default();
            match (coordinates, decision.action.selector.clone()) {
                (Some((x, y)), _) => Ok(vec![
                    BrowserAction::ClickAt { x, y },
                    BrowserAction::Type {
                        selector: None,
                        text,
                    },
                ]),
                (None, Some(selector)) => Ok(vec![BrowserAction::Type {
                    selector: Some(selector),
                    text,
                }]),
                (None, None) => Err("type needs a resolvable ref or a selector".into()),
            }
        },
        ActionKind::Scroll => Ok(vec![parse_scroll(decision.action.value.as_deref())]),
        ActionKind::Wait => {
            let ms = decision
                .action
                .value
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000);
            Ok(vec![BrowserAction::Wait { ms }])
        },
    }
}

fn parse_scroll(value: Option<&str>) -> BrowserAction {
    let direction = match value.map(str::trim) {
        Some("up") => Some(ScrollDirection::Up),
        Some("down") | None => Some(ScrollDirection::Down),
        Some("page_up") => Some(ScrollDirection::PageUp),
        Some("page_down") => Some(ScrollDirection::PageDown),
        Some("top") => Some(ScrollDirection::Top),
        Some("bottom") => Some(ScrollDirection::Bottom),
        Some(other) => match other.parse::<i64>() {
            Ok(dy) => {
                return BrowserAction::Scroll {
                    direction: None,
                    dx: Some(0),
                    dy: Some(dy),
                };
            },
            Err(_) => Some(ScrollDirection::Down),
        },
    };
    BrowserAction::Scroll {
        direction,
        dx: None,
        dy: None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionAction;

    fn decision(kind: ActionKind, value: Option<&str>) -> Decision {
        Decision {
            thinking: String::new(),
            action: DecisionAction {
                kind,
                ref_token: None,
                selector: None,
                value: value.map(String::from),
            },
            complete: false,
            result: None,
        }
    }

    #[test]
    fn click_prefers_resolved_coordinates() {
        let planned = plan_actions(&decision(ActionKind::Click, None), Some((12.0, 34.0))).unwrap();
        assert!(matches!(planned[0], BrowserAction::ClickAt { x, y } if x == 12.0 && y == 34.0));
    }

    #[test]
    fn click_without_ref_or_selector_is_invalid() {
        assert!(plan_actions(&decision(ActionKind::Click, None), None).is_err());
    }

    #[test]
    fn typing_against_a_ref_clicks_first() {
        let mut d = decision(ActionKind::Type, Some("hello"));
        d.action.ref_token = Some("IN1".into());
        let planned = plan_actions(&d, Some((5.0, 6.0))).unwrap();

        assert_eq!(planned.len(), 2);
        assert!(matches!(planned[0], BrowserAction::ClickAt { .. }));
        assert!(matches!(planned[1], BrowserAction::Type { ref selector, .. } if selector.is_none()));
    }

    #[test]
    fn scroll_values_parse_directions_and_pixel_deltas() {
        assert!(matches!(
            parse_scroll(Some("bottom")),
            BrowserAction::Scroll {
                direction: Some(ScrollDirection::Bottom),
                ..
            }
        ));
        assert!(matches!(
            parse_scroll(Some("600")),
            BrowserAction::Scroll {
                dy: Some(600),
                ..
            }
        ));
        assert!(matches!(
            parse_scroll(None),
            BrowserAction::Scroll {
                direction: Some(ScrollDirection::Down),
                ..
            }
        ));
    }

    #[test]
    fn wait_defaults_to_a_second() {
        let planned = plan_actions(&decision(ActionKind::Wait, None), None).unwrap();
        assert!(matches!(planned[0], BrowserAction::Wait { ms: 1000 }));

        let planned = plan_actions(&decision(ActionKind::Wait, Some("250")), None).unwrap();
        assert!(matches!(planned[0], BrowserAction::Wait { ms: 250 }));
    }
}
