//! Executor behavior over scripted LLM and browser capabilities.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio_stream::Stream,
    vision_browser::{
        BrowserAction, BrowserCapability, BrowserRegistry, ElementExtraction, ElementKind,
        ExtractedElement, SessionSpec, Viewport,
    },
    vision_executor::{ExecutorConfig, TaskExecutor},
    vision_llm::{
        ChatMessage, CompletionResponse, LlmProvider, LlmResolver, StopReason, StreamEvent, Usage,
    },
    vision_store::{
        MemoryBlobStore, Store,
        models::{ProjectSettings, TaskStatus},
        tasks::NewAiTask,
    },
};

/// LLM that replays a fixed sequence of response texts, then repeats the
/// last one.
struct ScriptedLlm {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> vision_llm::Result<CompletionResponse> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();

        Ok(CompletionResponse {
            text: Some(text),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 50,
                output_tokens: 10,
            },
        })
    }

    fn stream(
        &self,
        _messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        Box::pin(tokio_stream::empty())
    }
}

/// Test-only resolver: every model name maps to the scripted provider.
struct ScriptedFactory(Arc<ScriptedLlm>);

impl LlmResolver for ScriptedFactory {
    fn resolve(&self, _model: &str) -> vision_llm::Result<Arc<dyn LlmProvider>> {
        Ok(self.0.clone())
    }
}

/// Browser stub with one clickable button and scriptable action failures.
struct ScriptedBrowser {
    fail_actions: bool,
    actions: std::sync::Mutex<Vec<BrowserAction>>,
}

impl ScriptedBrowser {
    fn new(fail_actions: bool) -> Self {
        Self {
            fail_actions,
            actions: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BrowserCapability for ScriptedBrowser {
    fn provider(&self) -> &str {
        "local"
    }

    async fn create_session(&self, _spec: &SessionSpec) -> vision_browser::Result<String> {
        Ok("scripted".into())
    }

    async fn close_session(&self, _session_id: &str) -> vision_browser::Result<()> {
        Ok(())
    }

    async fn navigate(&self, _session_id: &str, _url: &str) -> vision_browser::Result<()> {
        Ok(())
    }

    async fn perform_action(
        &self,
        _session_id: &str,
        action: &BrowserAction,
    ) -> vision_browser::Result<()> {
        self.actions.lock().unwrap().push(action.clone());
        if self.fail_actions {
            Err(vision_browser::BrowserError::Timeout("scripted failure".into()))
        } else {
            Ok(())
        }
    }

    async fn screenshot(&self, _session_id: &str, _full_page: bool) -> vision_browser::Result<Vec<u8>> {
        Ok(vec![137, 80, 78, 71])
    }

    async fn page_content(&self, _session_id: &str) -> vision_browser::Result<String> {
        Ok(String::new())
    }

    async fn current_url(&self, _session_id: &str) -> vision_browser::Result<String> {
        Ok("https://app.example.com/dashboard".into())
    }

    async fn current_title(&self, _session_id: &str) -> vision_browser::Result<String> {
        Ok("Dashboard".into())
    }

    async fn evaluate(
        &self,
        _session_id: &str,
        _script: &str,
    ) -> vision_browser::Result<serde_json::Value> {
        Ok(serde_json::Value::Bool(false))
    }

    async fn wait_for_selector(
        &self,
        _session_id: &str,
        _selector: &str,
        _timeout_ms: u64,
    ) -> vision_browser::Result<()> {
        Ok(())
    }

    async fn wait_for_navigation(&self, _session_id: &str) -> vision_browser::Result<()> {
        Ok(())
    }

    async fn is_session_alive(&self, _session_id: &str) -> bool {
        true
    }

    async fn extract_elements(&self, _session_id: &str) -> vision_browser::Result<ElementExtraction> {
        Ok(ElementExtraction {
            elements: vec![ExtractedElement {
                ref_token: "BTN1".into(),
                kind: ElementKind::Button,
                tag: "button".into(),
                text: Some("Continue".into()),
                x: 100.0,
                y: 50.0,
                width: 80.0,
                height: 30.0,
            }],
            viewport_width: 1280,
            viewport_height: 720,
        })
    }

    async fn set_viewport(&self, _session_id: &str, _viewport: Viewport) -> vision_browser::Result<()> {
        Ok(())
    }

    async fn clear_cookies(&self, _session_id: &str) -> vision_browser::Result<()> {
        Ok(())
    }
}

struct Fixture {
    store: Store,
    executor: TaskExecutor,
    browser: Arc<ScriptedBrowser>,
    project_id: String,
}

async fn fixture(responses: Vec<String>, fail_actions: bool) -> Fixture {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    vision_store::init_schema(&pool).await.unwrap();
    let store = Store::new(pool);
    let project = store.projects().create("p", ProjectSettings::default()).await.unwrap();

    let browser = Arc::new(ScriptedBrowser::new(fail_actions));
    let mut registry = BrowserRegistry::new();
    registry.register(browser.clone());

    let llm = Arc::new(ScriptedLlm::new(responses));
    let executor = TaskExecutor::new(
        store.clone(),
        Arc::new(MemoryBlobStore::default()),
        Arc::new(ScriptedFactory(llm)),
        Arc::new(registry),
    )
    .with_config(ExecutorConfig {
        step_delay: Duration::from_millis(1),
        action_retry_delay: Duration::from_millis(1),
        ..Default::default()
    });

    Fixture {
        store,
        executor,
        browser,
        project_id: project.id,
    }
}

fn wait_forever() -> String {
    r#"{"thinking": "still loading", "action": {"type": "wait", "value": "500"},
        "complete": false}"#
        .to_string()
}

fn click_btn1() -> String {
    r#"{"thinking": "click continue", "action": {"type": "click", "ref": "BTN1"},
        "complete": false}"#
        .to_string()
}

fn complete_with(result: &str) -> String {
    format!(
        r#"{{"thinking": "done", "action": {{"type": "wait", "value": "0"}},
             "complete": true, "result": "{result}"}}"#
    )
}

async fn new_task(fx: &Fixture, max_steps: i64) -> String {
    fx.store
        .tasks()
        .create(
            &fx.project_id,
            NewAiTask {
                instruction: "press continue until done".into(),
                start_url: Some("https://app.example.com/dashboard".into()),
                model: "scripted-1".into(),
                browser_provider: "local".into(),
                max_steps,
                timeout_seconds: 30,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn step_budget_exhaustion_completes_with_a_max_steps_result() {
    let fx = fixture(vec![wait_forever()], false).await;
    let task_id = new_task(&fx, 3).await;

    let task = fx.executor.execute(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.result.unwrap().contains("Reached maximum steps (3)"));
    assert_eq!(task.steps_executed, 3);

    // Positions are a contiguous sequence starting at zero, and every
    // recorded step matches the counter.
    let steps = fx.store.tasks().steps(&task_id).await.unwrap();
    assert_eq!(steps.len(), 3);
    for (i, step) in steps.iter().enumerate() {
        assert_eq!(step.position, i as i64);
        assert_eq!(step.action, "wait");
        assert!(step.success);
    }
}

#[tokio::test]
async fn model_completion_stores_the_result_and_stops_early() {
    let fx = fixture(
        vec![click_btn1(), complete_with("logged in and verified")],
        false,
    )
    .await;
    let task_id = new_task(&fx, 10).await;

    let task = fx.executor.execute(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_deref(), Some("logged in and verified"));
    assert_eq!(task.steps_executed, 1);

    // The click resolved BTN1 to its center coordinates.
    let actions = fx.browser.actions.lock().unwrap();
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, BrowserAction::ClickAt { x, y } if *x == 140.0 && *y == 65.0))
    );
}

#[tokio::test]
async fn consecutive_failures_fail_the_task() {
    let fx = fixture(vec![click_btn1()], true).await;
    let task_id = new_task(&fx, 20).await;

    let task = fx.executor.execute(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.error_message.unwrap().contains("consecutive action failures"));
    // Exactly the failure budget's worth of steps ran.
    assert_eq!(task.steps_executed, 5);

    let steps = fx.store.tasks().steps(&task_id).await.unwrap();
    assert!(steps.iter().all(|s| !s.success));
}

#[tokio::test]
async fn stop_request_lands_the_task_in_stopped() {
    let fx = fixture(vec![wait_forever()], false).await;
    let task_id = new_task(&fx, 50).await;

    fx.store.tasks().request_stop(&task_id).await.unwrap();
    let task = fx.executor.execute(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Stopped);
    assert_eq!(task.steps_executed, 0);
}

#[tokio::test]
async fn token_usage_accumulates_onto_the_task() {
    let fx = fixture(vec![wait_forever()], false).await;
    let task_id = new_task(&fx, 2).await;

    let task = fx.executor.execute(&task_id).await.unwrap();
    assert_eq!(task.input_tokens, 100);
    assert_eq!(task.output_tokens, 20);
}

#[tokio::test]
async fn successful_clicks_land_in_the_action_cache_at_flush() {
    let fx = fixture(
        vec![
            click_btn1(),
            click_btn1(),
            complete_with("done"),
        ],
        false,
    )
    .await;
    let task_id = new_task(&fx, 10).await;
    fx.executor.execute(&task_id).await.unwrap();

    let hits = fx
        .store
        .action_cache()
        .lookup(
            &fx.project_id,
            "https://app.example.com/dashboard",
            Some("click"),
            Some("press continue until done"),
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].success_count, 2);
}

#[tokio::test]
async fn pooled_execution_reuses_a_worker_and_reconfigures_its_viewport() {
    use vision_browser::{PoolConfig, SessionSpec, WorkerPool};

    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    vision_store::init_schema(&pool).await.unwrap();
    let store = Store::new(pool);
    let project = store.projects().create("p", ProjectSettings::default()).await.unwrap();

    let browser = Arc::new(ScriptedBrowser::new(false));
    let mut registry = BrowserRegistry::new();
    registry.register(browser.clone());

    let worker_pool = Arc::new(WorkerPool::new(
        browser.clone(),
        SessionSpec::default(),
        PoolConfig {
            size: 1,
            checkout_timeout: Duration::from_millis(200),
            stale_after: Duration::from_secs(1800),
        },
    ));

    let llm = Arc::new(ScriptedLlm::new(vec![complete_with("done")]));
    let executor = TaskExecutor::new(
        store.clone(),
        Arc::new(MemoryBlobStore::default()),
        Arc::new(ScriptedFactory(llm)),
        Arc::new(registry),
    )
    .with_pool(worker_pool)
    .with_config(ExecutorConfig {
        step_delay: Duration::from_millis(1),
        ..Default::default()
    });

    let task_id = store
        .tasks()
        .create(
            &project.id,
            NewAiTask {
                instruction: "done immediately".into(),
                model: "scripted-1".into(),
                browser_provider: "local".into(),
                max_steps: 5,
                timeout_seconds: 30,
                viewport_width: 390,
                viewport_height: 844,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id;

    let task = executor.execute(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn undecodable_replies_degrade_to_waits() {
    let fx = fixture(
        vec!["I cannot help with that.".into(), complete_with("ok")],
        false,
    )
    .await;
    let task_id = new_task(&fx, 5).await;

    let task = fx.executor.execute(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let steps = fx.store.tasks().steps(&task_id).await.unwrap();
    assert_eq!(steps[0].action, "wait");
    assert_eq!(steps[0].value.as_deref(), Some("1000"));
}
