//! The model's action grammar and its decoder.
//!
//! Responses must carry a single JSON object shaped as
//! `{thinking, action: {type, ref?, value?}, complete, result?}`. The
//! decoder validates the shape and returns typed errors; callers fall
//! back to a one-second wait when decoding fails so the loop never stalls
//! on a malformed reply.

use {serde::Deserialize, thiserror::Error};

use vision_llm::json::first_json_object;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("no JSON object in model output")]
    NoJson,

    #[error("decision JSON malformed: {0}")]
    Malformed(String),

    #[error("unknown action type {0}")]
    UnknownAction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    Wait,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Type => "type",
            Self::Scroll => "scroll",
            Self::Wait => "wait",
        }
    }
}

/// One decoded model decision.
#[derive(Debug, Clone)]
pub struct Decision {
    pub thinking: String,
    pub action: DecisionAction,
    pub complete: bool,
    pub result: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecisionAction {
    pub kind: ActionKind,
    /// Element reference token, e.g. "BTN5" or "CHK1".
    pub ref_token: Option<String>,
    /// CSS selector, normalized of jQuery-isms.
    pub selector: Option<String>,
    pub value: Option<String>,
}

impl Decision {
    /// The safe default when the model's reply cannot be decoded: wait a
    /// second and observe again.
    pub fn fallback() -> Self {
        Self {
            thinking: String::new(),
            action: DecisionAction {
                kind: ActionKind::Wait,
                ref_token: None,
                selector: None,
                value: Some("1000".into()),
            },
            complete: false,
            result: None,
        }
    }
}

#[derive(Deserialize)]
struct RawDecision {
    #[serde(default)]
    thinking: String,
    action: Option<RawAction>,
    #[serde(default)]
    complete: bool,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "ref", default)]
    ref_token: Option<String>,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// Decode the first JSON object in a model reply into a [`Decision`].
pub fn decode(raw: &str) -> Result<Decision, DecodeError> {
    let value = first_json_object(raw).ok_or(DecodeError::NoJson)?;
    let parsed: RawDecision =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let action = match parsed.action {
        Some(raw_action) => {
            let kind = match raw_action.kind.as_str() {
                "click" => ActionKind::Click,
                "type" => ActionKind::Type,
                "scroll" => ActionKind::Scroll,
                "wait" => ActionKind::Wait,
                other => return Err(DecodeError::UnknownAction(other.to_string())),
            };
            DecisionAction {
                kind,
                ref_token: raw_action.ref_token.filter(|t| !t.is_empty()),
                selector: raw_action
                    .selector
                    .filter(|s| !s.is_empty())
                    .map(|s| normalize_selector(&s)),
                value: raw_action.value,
            }
        },
        // A reply that only declares completion still needs an action slot.
        None if parsed.complete => DecisionAction {
            kind: ActionKind::Wait,
            ref_token: None,
            selector: None,
            value: Some("0".into()),
        },
        None => return Err(DecodeError::Malformed("missing action".into())),
    };

    Ok(Decision {
        thinking: parsed.thinking,
        action,
        complete: parsed.complete,
        result: parsed.result,
    })
}

/// Rewrite jQuery-flavored selectors the model sometimes produces into
/// ones the browser accepts: `:contains(...)` → `:has-text(...)`, and
/// `:visible` is dropped entirely.
pub fn normalize_selector(raw: &str) -> String {
    let mut selector = raw.replace(":contains(", ":has-text(");
    selector = selector.replace(":visible", "");
    selector.trim().to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_decision_decodes() {
        let raw = r#"{
            "thinking": "the login button is BTN2",
            "action": {"type": "click", "ref": "BTN2"},
            "complete": false
        }"#;

        let decision = decode(raw).unwrap();
        assert_eq!(decision.action.kind, ActionKind::Click);
        assert_eq!(decision.action.ref_token.as_deref(), Some("BTN2"));
        assert!(!decision.complete);
    }

    #[test]
    fn completion_reply_without_action_is_accepted() {
        let raw = r#"{"thinking": "done", "complete": true, "result": "order placed"}"#;
        let decision = decode(raw).unwrap();
        assert!(decision.complete);
        assert_eq!(decision.result.as_deref(), Some("order placed"));
    }

    #[test]
    fn json_wrapped_in_prose_still_decodes() {
        let raw = "I'll type into the field now.\n```json\n{\"thinking\": \"t\", \
                   \"action\": {\"type\": \"type\", \"ref\": \"IN1\", \"value\": \"hi\"}, \
                   \"complete\": false}\n```";
        let decision = decode(raw).unwrap();
        assert_eq!(decision.action.kind, ActionKind::Type);
        assert_eq!(decision.action.value.as_deref(), Some("hi"));
    }

    #[test]
    fn unknown_actions_are_typed_errors() {
        let raw = r#"{"action": {"type": "drag"}, "complete": false}"#;
        assert_eq!(decode(raw).unwrap_err(), DecodeError::UnknownAction("drag".into()));
    }

    #[test]
    fn garbage_is_a_no_json_error_and_fallback_waits() {
        assert_eq!(decode("sorry, I cannot").unwrap_err(), DecodeError::NoJson);

        let fallback = Decision::fallback();
        assert_eq!(fallback.action.kind, ActionKind::Wait);
        assert_eq!(fallback.action.value.as_deref(), Some("1000"));
        assert!(!fallback.complete);
    }

    #[test]
    fn jquery_selectors_are_normalized() {
        assert_eq!(
            normalize_selector("button:contains(Submit):visible"),
            "button:has-text(Submit)"
        );
        assert_eq!(normalize_selector(".ok"), ".ok");
    }

    #[test]
    fn selectors_in_decisions_get_normalized_on_decode() {
        let raw = r#"{"action": {"type": "click", "selector": "a:contains(Next):visible"},
                      "complete": false}"#;
        let decision = decode(raw).unwrap();
        assert_eq!(decision.action.selector.as_deref(), Some("a:has-text(Next)"));
    }
}
