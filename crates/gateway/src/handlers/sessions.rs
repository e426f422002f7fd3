//! Live browser session endpoints: lifecycle, direct actions, one-shot AI
//! actions, structured extraction, and screenshots.

use std::{sync::Arc, time::Instant};

use {
    axum::{
        Json,
        extract::{Path, Query, State},
        http::header,
        response::{IntoResponse, Response},
    },
    base64::Engine,
    serde::Deserialize,
    tracing::{info, warn},
    vision_browser::{BrowserAction, BrowserCapability, ScrollDirection, SessionSpec, Viewport},
    vision_executor::{Decision, decode, plan_actions},
    vision_llm::{ImageData, LlmProvider, LlmResolver},
    vision_store::models::{BrowserSessionRecord, SessionStatus},
};

use crate::{
    error::{ApiError, ApiResult},
    handlers::pages::ProjectScope,
    state::AppState,
};

#[derive(Deserialize)]
pub struct CreateSession {
    pub project_id: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSession>,
) -> ApiResult<Json<serde_json::Value>> {
    let project = state.store.projects().get(&body.project_id).await?;
    let provider = body
        .provider
        .unwrap_or_else(|| project.settings.default_browser_provider.clone());
    let capability = state.browsers.get(&provider)?;

    let width = body.width.unwrap_or(1280);
    let height = body.height.unwrap_or(720);

    let record = state
        .store
        .sessions()
        .create(&body.project_id, &provider, width, height, None)
        .await?;

    let spec = SessionSpec {
        viewport: Viewport { width, height },
        ..Default::default()
    };
    match capability.create_session(&spec).await {
        Ok(provider_session_id) => {
            state
                .store
                .sessions()
                .attach_provider_session(&record.id, &provider_session_id)
                .await?;
        },
        Err(e) => {
            state
                .store
                .sessions()
                .set_status(&record.id, SessionStatus::Error)
                .await?;
            return Err(e.into());
        },
    }

    let record = state.store.sessions().get(&record.id).await?;
    Ok(Json(serde_json::to_value(&record).unwrap_or_default()))
}

pub async fn list(
    State(state): State<AppState>,
    Query(scope): Query<ProjectScope>,
) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state.store.sessions().list_active(&scope.project_id).await?;
    Ok(Json(serde_json::json!({"sessions": sessions})))
}

pub async fn close(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = state.store.sessions().get(&id).await?;
    if let Some(provider_session_id) = record.provider_session_id.as_deref() {
        let capability = state.browsers.get(&record.provider)?;
        if let Err(e) = capability.close_session(provider_session_id).await {
            warn!(session_id = id, error = %e, "provider session close failed");
        }
    }
    state.store.sessions().set_status(&id, SessionStatus::Closed).await?;
    Ok(Json(serde_json::json!({"closed": id})))
}

/// Live view of the session: stored record plus the browser's current
/// location and liveness.
pub async fn get_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = state.store.sessions().get(&id).await?;
    let mut body = serde_json::to_value(&record).unwrap_or_default();

    if let Some(provider_session_id) = record.provider_session_id.as_deref() {
        let capability = state.browsers.get(&record.provider)?;
        let alive = capability.is_session_alive(provider_session_id).await;
        body["alive"] = serde_json::Value::Bool(alive);
        if alive {
            let url = capability.current_url(provider_session_id).await.unwrap_or_default();
            let title = capability.current_title(provider_session_id).await.unwrap_or_default();
            let _ = state.store.sessions().update_location(&id, &url, &title).await;
            body["current_url"] = serde_json::Value::String(url);
            body["current_title"] = serde_json::Value::String(title);
        }
    }

    Ok(Json(body))
}

#[derive(Deserialize)]
pub struct PerformRequest {
    pub action: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
}

pub async fn perform(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PerformRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (record, capability, provider_session_id) = live_session(&state, &id).await?;

    let action = to_browser_action(&body)?;
    let started = Instant::now();
    capability.perform_action(&provider_session_id, &action).await?;
    let duration_ms = started.elapsed().as_millis() as u64;

    refresh_location(&state, &record, capability.as_ref(), &provider_session_id).await;

    Ok(Json(serde_json::json!({
        "success": true,
        "action": body.action,
        "duration_ms": duration_ms,
    })))
}

#[derive(Deserialize)]
pub struct AiRequest {
    pub instruction: String,
}

/// One AI-directed action: try the action cache first, fall back to a
/// vision decision, and feed the outcome back into the cache.
pub async fn ai(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AiRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (record, capability, provider_session_id) = live_session(&state, &id).await?;
    let project = state.store.projects().get(&record.project_id).await?;

    let url = capability.current_url(&provider_session_id).await.unwrap_or_default();

    // Reliable cached action for this page + instruction?
    let cached = state
        .store
        .action_cache()
        .lookup(&record.project_id, &url, None, Some(&body.instruction))
        .await?
        .into_iter()
        .next();

    if let Some(entry) = cached {
        let started = Instant::now();
        let outcome = perform_cached(&capability, &provider_session_id, &entry.action_data).await;
        let duration = started.elapsed().as_millis() as f64;

        match outcome {
            Ok(action) => {
                let _ = state.store.action_cache().record_success(&entry.id, Some(duration)).await;

                #[cfg(feature = "prometheus")]
                vision_metrics::counter!(vision_metrics::executor::CACHE_HITS_TOTAL).increment(1);

                refresh_location(&state, &record, capability.as_ref(), &provider_session_id).await;
                return Ok(Json(serde_json::json!({
                    "success": true,
                    "action": action,
                    "reasoning": "replayed a previously successful action for this page",
                    "cached": true,
                })));
            },
            Err(e) => {
                warn!(entry_id = entry.id, error = %e, "cached action failed, falling back to model");
                let _ = state.store.action_cache().record_failure(&entry.id).await;
            },
        }
    }

    // Vision decision.
    let llm = state.llm.resolve(&project.settings.default_model)?;
    let screenshot = capability.screenshot(&provider_session_id, false).await?;
    let extraction = capability.extract_elements(&provider_session_id).await?;
    let title = capability.current_title(&provider_session_id).await.unwrap_or_default();

    let prompt = vision_executor::prompt::build_prompt(
        &body.instruction,
        &url,
        &title,
        0,
        1,
        &[],
        &extraction,
    );
    let response = llm.analyze_image(ImageData::from_bytes(&screenshot), &prompt).await?;
    let raw = response.text.unwrap_or_default();
    let decision = decode(&raw).unwrap_or_else(|_| Decision::fallback());

    let coordinates = decision
        .action
        .ref_token
        .as_deref()
        .and_then(|token| extraction.resolve(token))
        .map(|element| (element.x, element.y));

    if decision.complete {
        return Ok(Json(serde_json::json!({
            "success": true,
            "action": "none",
            "reasoning": decision.thinking,
            "result": decision.result,
        })));
    }

    let actions = plan_actions(&decision, coordinates).map_err(ApiError::validation)?;
    for action in &actions {
        capability.perform_action(&provider_session_id, action).await?;
    }

    // Successful model-chosen actions seed the cache for next time.
    if matches!(
        decision.action.kind,
        vision_executor::ActionKind::Click | vision_executor::ActionKind::Type
    ) {
        let action_data = serde_json::json!({
            "ref": decision.action.ref_token,
            "coordinates": coordinates.map(|(x, y)| serde_json::json!({"x": x, "y": y})),
            "value": decision.action.value,
        });
        let _ = state
            .store
            .action_cache()
            .store(
                &record.project_id,
                &url,
                decision.action.kind.as_str(),
                &action_data,
                Some(&body.instruction),
            )
            .await;
    }

    refresh_location(&state, &record, capability.as_ref(), &provider_session_id).await;

    info!(session_id = id, action = decision.action.kind.as_str(), "AI action performed");
    Ok(Json(serde_json::json!({
        "success": true,
        "action": decision.action.kind.as_str(),
        "reasoning": decision.thinking,
        "cached": false,
    })))
}

#[derive(Deserialize)]
pub struct ExtractRequest {
    pub instruction: String,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    #[serde(default)]
    pub use_vision: bool,
}

/// Extract data from the current page, optionally against a JSON schema
/// and optionally from a screenshot instead of the DOM.
pub async fn extract(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExtractRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (record, capability, provider_session_id) = live_session(&state, &id).await?;
    let project = state.store.projects().get(&record.project_id).await?;
    let llm = state.llm.resolve(&project.settings.default_model)?;

    if body.use_vision {
        let screenshot = capability.screenshot(&provider_session_id, false).await?;
        let prompt = match &body.schema {
            Some(schema) => format!(
                "{}\n\nRespond with a single JSON object matching this schema:\n{schema}",
                body.instruction
            ),
            None => body.instruction.clone(),
        };
        let response = llm.analyze_image(ImageData::from_bytes(&screenshot), &prompt).await?;
        let text = response.text.unwrap_or_default();

        let data = match body.schema {
            Some(_) => vision_llm::json::first_json_object(&text)
                .unwrap_or(serde_json::Value::String(text)),
            None => serde_json::Value::String(text),
        };
        return Ok(Json(serde_json::json!({"data": data})));
    }

    let content = capability.page_content(&provider_session_id).await?;
    let data = match body.schema {
        Some(schema) => {
            let full = format!("{}\n\n{}", body.instruction, content);
            llm.extract_structured(&full, &schema).await?
        },
        None => {
            let response = llm
                .complete(&[vision_llm::ChatMessage::user(format!(
                    "{}\n\nPage content:\n{}",
                    body.instruction, content
                ))])
                .await?;
            serde_json::Value::String(response.text.unwrap_or_default())
        },
    };

    Ok(Json(serde_json::json!({"data": data})))
}

#[derive(Deserialize)]
pub struct ScreenshotQuery {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub full_page: bool,
}

pub async fn screenshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ScreenshotQuery>,
) -> ApiResult<Response> {
    let (_, capability, provider_session_id) = live_session(&state, &id).await?;
    let png = capability.screenshot(&provider_session_id, query.full_page).await?;

    match query.format.as_deref() {
        Some("binary") => Ok((
            [(header::CONTENT_TYPE, "image/png")],
            png,
        )
            .into_response()),
        _ => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
            Ok(Json(serde_json::json!({"screenshot": encoded, "format": "base64"}))
                .into_response())
        },
    }
}

// ── helpers ─────────────────────────────────────────────────────────────

async fn live_session(
    state: &AppState,
    id: &str,
) -> ApiResult<(BrowserSessionRecord, Arc<dyn BrowserCapability>, String)> {
    let record = state.store.sessions().get(id).await?;
    let provider_session_id = record
        .provider_session_id
        .clone()
        .ok_or_else(|| ApiError::validation("session has no live browser"))?;
    let capability = state.browsers.get(&record.provider)?;
    Ok((record, capability, provider_session_id))
}

async fn refresh_location(
    state: &AppState,
    record: &BrowserSessionRecord,
    capability: &dyn BrowserCapability,
    provider_session_id: &str,
) {
    let url = capability.current_url(provider_session_id).await.unwrap_or_default();
    let title = capability.current_title(provider_session_id).await.unwrap_or_default();
    let _ = state.store.sessions().update_location(&record.id, &url, &title).await;
}

/// Replay a cached action payload: coordinates first, then value typing.
async fn perform_cached(
    capability: &Arc<dyn BrowserCapability>,
    provider_session_id: &str,
    action_data: &serde_json::Value,
) -> Result<String, vision_browser::BrowserError> {
    let coordinates = action_data["coordinates"].as_object().and_then(|c| {
        Some((c.get("x")?.as_f64()?, c.get("y")?.as_f64()?))
    });

    match coordinates {
        Some((x, y)) => {
            capability
                .perform_action(provider_session_id, &BrowserAction::ClickAt { x, y })
                .await?;
            if let Some(value) = action_data["value"].as_str().filter(|v| !v.is_empty()) {
                capability
                    .perform_action(
                        provider_session_id,
                        &BrowserAction::Type {
                            selector: None,
                            text: value.to_string(),
                        },
                    )
                    .await?;
                return Ok("type".into());
            }
            Ok("click".into())
        },
        None => Err(vision_browser::BrowserError::InvalidAction(
            "cached action has no coordinates".into(),
        )),
    }
}

/// Translate the flat perform-request shape into a typed browser action.
fn to_browser_action(request: &PerformRequest) -> ApiResult<BrowserAction> {
    let options = &request.options;
    let x = options["x"].as_f64();
    let y = options["y"].as_f64();
    let selector = request.selector.clone();
    let value = request.value.clone();

    let require_selector = || {
        selector
            .clone()
            .ok_or_else(|| ApiError::validation(format!("{} requires a selector", request.action)))
    };

    let action = match request.action.as_str() {
        "click" => BrowserAction::Click { selector, x, y },
        "click_at" => match (x, y) {
            (Some(x), Some(y)) => BrowserAction::ClickAt { x, y },
            _ => return Err(ApiError::validation("click_at requires x and y")),
        },
        "type" => BrowserAction::Type {
            selector,
            text: value.unwrap_or_default(),
        },
        "fill" => BrowserAction::Fill {
            selector: require_selector()?,
            value: value.unwrap_or_default(),
        },
        "hover" => BrowserAction::Hover { selector, x, y },
        "scroll" => {
            let direction = options["direction"].as_str().and_then(parse_direction);
            BrowserAction::Scroll {
                direction,
                dx: options["dx"].as_i64(),
                dy: options["dy"].as_i64(),
            }
        },
        "scroll_into_view" => BrowserAction::ScrollIntoView {
            selector: require_selector()?,
        },
        "select" => BrowserAction::Select {
            selector: require_selector()?,
            value: value.unwrap_or_default(),
        },
        "wait" => BrowserAction::Wait {
            ms: value.as_deref().and_then(|v| v.parse().ok()).unwrap_or(1000),
        },
        "press" => BrowserAction::Press {
            key: value.unwrap_or_else(|| "Enter".into()),
        },
        "focus" => BrowserAction::Focus {
            selector: require_selector()?,
        },
        "clear" => BrowserAction::Clear {
            selector: require_selector()?,
        },
        "check" => BrowserAction::Check {
            selector: require_selector()?,
        },
        "uncheck" => BrowserAction::Uncheck {
            selector: require_selector()?,
        },
        "navigate" => BrowserAction::Navigate {
            url: value.ok_or_else(|| ApiError::validation("navigate requires a value (url)"))?,
        },
        other => return Err(ApiError::validation(format!("unknown action {other}"))),
    };

    Ok(action)
}

fn parse_direction(raw: &str) -> Option<ScrollDirection> {
    match raw {
        "up" => Some(ScrollDirection::Up),
        "down" => Some(ScrollDirection::Down),
        "page_up" => Some(ScrollDirection::PageUp),
        "page_down" => Some(ScrollDirection::PageDown),
        "top" => Some(ScrollDirection::Top),
        "bottom" => Some(ScrollDirection::Bottom),
        _ => None,
    }
}
