//! Conversational executor variant.
//!
//! Decisions carry a confidence score instead of being trusted outright.
//! Low-confidence decisions and stuck loops (repeated observations of the
//! same page state) escalate to the user as question events, and the agent
//! blocks for an answer before acting.

use std::{
    collections::{VecDeque, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::Arc,
    time::{Duration, Instant},
};

use {
    serde::Deserialize,
    tokio::sync::{Mutex, mpsc},
    tracing::{info, warn},
    vision_browser::{BrowserCapability, BrowserRegistry, ElementExtraction, SessionSpec, Viewport},
    vision_llm::{ImageData, LlmProvider, LlmResolver},
    vision_store::{
        Store,
        models::TaskStatus,
        tasks::NewTaskStep,
    },
};

use crate::{
    cleaner,
    decision::{Decision, DecodeError, decode},
    error::{Error, Result},
    executor::plan_actions,
    prompt::{StepSummary, build_prompt},
};

/// Confidence below which the agent asks instead of acting.
const MIN_CONFIDENCE: u8 = 50;
/// Identical consecutive observations that count as stuck.
const MAX_SAME_STATE: usize = 3;
/// How long to wait for a user answer.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Events the conversational agent emits toward the user.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A step was taken.
    Step {
        action: String,
        reasoning: String,
        success: bool,
    },
    /// The agent needs input before proceeding.
    Question(String),
    /// Terminal result.
    Finished { status: TaskStatus, result: Option<String> },
}

/// A decision with its confidence and optional question.
#[derive(Debug, Clone)]
pub struct ConversationalDecision {
    pub decision: Decision,
    /// 0–100 self-assessed confidence.
    pub confidence: u8,
    pub question: Option<String>,
}

#[derive(Deserialize)]
struct ConfidenceFields {
    #[serde(default = "default_confidence")]
    confidence: u8,
    #[serde(default)]
    question: Option<String>,
}

fn default_confidence() -> u8 {
    100
}

/// Decode the conversational grammar: the base decision plus
/// `confidence` and `question` fields.
pub fn decode_conversational(raw: &str) -> std::result::Result<ConversationalDecision, DecodeError> {
    let decision = decode(raw)?;
    let extra = vision_llm::json::first_json_object(raw)
        .and_then(|value| serde_json::from_value::<ConfidenceFields>(value).ok())
        .unwrap_or(ConfidenceFields {
            confidence: default_confidence(),
            question: None,
        });

    Ok(ConversationalDecision {
        decision,
        confidence: extra.confidence.min(100),
        question: extra.question,
    })
}

/// Detects the agent spinning on the same page state: the last
/// [`MAX_SAME_STATE`] observations sharing one URL + ref-set signature.
#[derive(Default)]
pub struct StuckDetector {
    recent: VecDeque<u64>,
}

impl StuckDetector {
    /// Record an observation; returns `true` when the agent is stuck.
    pub fn observe(&mut self, url: &str, extraction: &ElementExtraction) -> bool {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        for element in &extraction.elements {
            element.ref_token.hash(&mut hasher);
        }
        let signature = hasher.finish();

        self.recent.push_back(signature);
        while self.recent.len() > MAX_SAME_STATE {
            self.recent.pop_front();
        }

        self.recent.len() == MAX_SAME_STATE
            && self.recent.iter().all(|s| *s == self.recent[0])
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }
}

/// Duplex channel to the user: events out, answers in.
pub struct UserChannel {
    events: mpsc::Sender<AgentEvent>,
    responses: Mutex<mpsc::Receiver<String>>,
}

impl UserChannel {
    pub fn new(events: mpsc::Sender<AgentEvent>, responses: mpsc::Receiver<String>) -> Self {
        Self {
            events,
            responses: Mutex::new(responses),
        }
    }

    pub async fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event).await;
    }

    /// Ask and block for an answer, up to the response timeout.
    pub async fn ask(&self, question: String) -> Option<String> {
        self.emit(AgentEvent::Question(question)).await;
        let mut responses = self.responses.lock().await;
        tokio::time::timeout(RESPONSE_TIMEOUT, responses.recv())
            .await
            .ok()
            .flatten()
    }
}

pub struct ConversationalExecutor {
    store: Store,
    llm_factory: Arc<dyn LlmResolver>,
    browsers: Arc<BrowserRegistry>,
    channel: Arc<UserChannel>,
}

impl ConversationalExecutor {
    pub fn new(
        store: Store,
        llm_factory: Arc<dyn LlmResolver>,
        browsers: Arc<BrowserRegistry>,
        channel: Arc<UserChannel>,
    ) -> Self {
        Self {
            store,
            llm_factory,
            browsers,
            channel,
        }
    }

    /// Run a task interactively. Structure mirrors the batch executor but
    /// every low-confidence or stuck step detours through the user.
    pub async fn execute(&self, task_id: &str) -> Result<()> {
        let task = self.store.tasks().get(task_id).await?;
        let llm = self.llm_factory.resolve(&task.model)?;
        let browser = self.browsers.get(&task.browser_provider)?;

        self.store.tasks().mark_running(task_id).await?;

        let spec = SessionSpec {
            viewport: Viewport {
                width: task.viewport_width,
                height: task.viewport_height,
            },
            ..Default::default()
        };
        let session_id = browser.create_session(&spec).await?;

        let outcome = self
            .run_loop(&task, llm.as_ref(), &browser, &session_id)
            .await;

        if let Err(e) = browser.close_session(&session_id).await {
            warn!(task_id, error = %e, "failed to close conversational session");
        }

        let (status, result, error_message) = match outcome {
            Ok(Some(result)) => (TaskStatus::Completed, Some(result), None),
            Ok(None) => (
                TaskStatus::Completed,
                Some(format!("Reached maximum steps ({})", task.max_steps)),
                None,
            ),
            Err(e) => (TaskStatus::Error, None, Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .tasks()
            .finish(task_id, status, result.as_deref(), error_message.as_deref())
            .await
            && !matches!(e, vision_store::StoreError::Conflict(_))
        {
            return Err(e.into());
        }

        self.channel
            .emit(AgentEvent::Finished { status, result })
            .await;
        Ok(())
    }

    async fn run_loop(
        &self,
        task: &vision_store::models::AiTask,
        llm: &dyn LlmProvider,
        browser: &Arc<dyn BrowserCapability>,
        session_id: &str,
    ) -> Result<Option<String>> {
        if let Some(start_url) = task.start_url.as_deref()
            && let Err(e) = browser.navigate(session_id, start_url).await
        {
            warn!(task_id = task.id, error = %e, "initial navigation failed");
        }
        cleaner::run(browser, session_id).await;

        let mut history: Vec<StepSummary> = Vec::new();
        let mut stuck = StuckDetector::default();

        for step in 0..task.max_steps {
            if self.store.tasks().is_stop_requested(&task.id).await? {
                return Err(Error::Invalid("stopped by user".into()));
            }

            let screenshot = browser.screenshot(session_id, false).await?;
            let extraction = browser.extract_elements(session_id).await?;
            let url = browser.current_url(session_id).await.unwrap_or_default();
            let title = browser.current_title(session_id).await.unwrap_or_default();

            if stuck.observe(&url, &extraction) {
                let answer = self
                    .channel
                    .ask(format!(
                        "I seem to be stuck on {url} (same page state {MAX_SAME_STATE} \
                         observations in a row). How should I proceed?"
                    ))
                    .await;
                stuck.reset();
                if let Some(answer) = answer {
                    history.push(StepSummary {
                        action: format!("user guidance: {answer}"),
                        target: None,
                        success: true,
                    });
                }
            }

            let prompt = format!(
                "{}\nAlso include a \"confidence\" field (0-100) for how sure you are \
                 of this action, and a \"question\" field when you need user input.",
                build_prompt(
                    &task.instruction,
                    &url,
                    &title,
                    step,
                    task.max_steps,
                    &history,
                    &extraction,
                )
            );

            let conversational = match llm
                .analyze_image(ImageData::from_bytes(&screenshot), &prompt)
                .await
            {
                Ok(response) => {
                    let raw = response.text.unwrap_or_default();
                    decode_conversational(&raw).unwrap_or(ConversationalDecision {
                        decision: Decision::fallback(),
                        confidence: 100,
                        question: None,
                    })
                },
                Err(e) => {
                    warn!(task_id = task.id, step, error = %e, "LLM call failed, waiting");
                    ConversationalDecision {
                        decision: Decision::fallback(),
                        confidence: 100,
                        question: None,
                    }
                },
            };

            // Low confidence: surface the model's question (or a default)
            // and feed the answer into the next observation.
            if conversational.confidence < MIN_CONFIDENCE {
                let question = conversational.question.clone().unwrap_or_else(|| {
                    format!(
                        "I'm only {}% confident about the next step on {url}. \
                         What should I do?",
                        conversational.confidence
                    )
                });
                if let Some(answer) = self.channel.ask(question).await {
                    history.push(StepSummary {
                        action: format!("user guidance: {answer}"),
                        target: None,
                        success: true,
                    });
                    continue;
                }
                info!(task_id = task.id, step, "no user answer, proceeding anyway");
            }

            let decision = conversational.decision;
            if decision.complete {
                return Ok(Some(
                    decision.result.unwrap_or_else(|| "Task completed".to_string()),
                ));
            }

            let coordinates = decision
                .action
                .ref_token
                .as_deref()
                .and_then(|token| extraction.resolve(token))
                .map(|e| (e.x, e.y));

            let started = Instant::now();
            let action_error = match plan_actions(&decision, coordinates) {
                Ok(actions) => {
                    let mut failure = None;
                    for action in &actions {
                        if let Err(e) = browser.perform_action(session_id, action).await {
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                    failure
                },
                Err(e) => Some(e),
            };
            let success = action_error.is_none();

            self.store
                .tasks()
                .record_step(
                    &task.id,
                    NewTaskStep {
                        action: decision.action.kind.as_str().to_string(),
                        selector: decision.action.selector.clone(),
                        value: decision.action.value.clone(),
                        action_data: None,
                        success,
                        error: action_error,
                        duration_ms: started.elapsed().as_millis() as i64,
                        url_before: Some(url),
                        url_after: browser.current_url(session_id).await.ok(),
                        reasoning: Some(decision.thinking.clone()),
                        ..Default::default()
                    },
                )
                .await?;

            self.channel
                .emit(AgentEvent::Step {
                    action: decision.action.kind.as_str().to_string(),
                    reasoning: decision.thinking.clone(),
                    success,
                })
                .await;

            history.push(StepSummary {
                action: decision.action.kind.as_str().to_string(),
                target: decision.action.ref_token.clone(),
                success,
            });

            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        Ok(None)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use vision_browser::{ElementKind, ExtractedElement};

    use super::*;

    fn extraction(tokens: &[&str]) -> ElementExtraction {
        ElementExtraction {
            elements: tokens
                .iter()
                .map(|t| ExtractedElement {
                    ref_token: t.to_string(),
                    kind: ElementKind::Button,
                    tag: "button".into(),
                    text: None,
                    x: 0.0,
                    y: 0.0,
                    width: 10.0,
                    height: 10.0,
                })
                .collect(),
            viewport_width: 1280,
            viewport_height: 720,
        }
    }

    #[test]
    fn confidence_and_question_decode() {
        let raw = r#"{
            "thinking": "not sure which account",
            "action": {"type": "wait", "value": "500"},
            "complete": false,
            "confidence": 30,
            "question": "Which account should I use?"
        }"#;

        let decoded = decode_conversational(raw).unwrap();
        assert_eq!(decoded.confidence, 30);
        assert_eq!(decoded.question.as_deref(), Some("Which account should I use?"));
    }

    #[test]
    fn missing_confidence_defaults_to_full() {
        let raw = r#"{"action": {"type": "wait"}, "complete": false}"#;
        assert_eq!(decode_conversational(raw).unwrap().confidence, 100);
    }

    #[test]
    fn stuck_needs_three_identical_observations() {
        let mut detector = StuckDetector::default();
        let same = extraction(&["BTN1", "LNK1"]);

        assert!(!detector.observe("https://a.dev/x", &same));
        assert!(!detector.observe("https://a.dev/x", &same));
        assert!(detector.observe("https://a.dev/x", &same));
    }

    #[test]
    fn url_or_ref_changes_reset_the_streak() {
        let mut detector = StuckDetector::default();
        let same = extraction(&["BTN1"]);

        detector.observe("https://a.dev/x", &same);
        detector.observe("https://a.dev/x", &same);
        // Different element set breaks the run.
        assert!(!detector.observe("https://a.dev/x", &extraction(&["BTN1", "BTN2"])));
        // And three more identical are needed again.
        detector.observe("https://a.dev/x", &same);
        detector.observe("https://a.dev/x", &same);
        assert!(detector.observe("https://a.dev/x", &same));
    }

    #[tokio::test]
    async fn ask_times_out_quietly_without_a_listener_response() {
        tokio::time::pause();

        let (events_tx, mut events_rx) = mpsc::channel(4);
        let (_responses_tx, responses_rx) = mpsc::channel::<String>(1);
        let channel = UserChannel::new(events_tx, responses_rx);

        let asker = tokio::spawn(async move { channel.ask("proceed?".into()).await });
        // The question event is emitted before blocking.
        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, AgentEvent::Question(q) if q == "proceed?"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(asker.await.unwrap().is_none());
    }
}
