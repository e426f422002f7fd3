use std::pin::Pin;

use {async_trait::async_trait, futures::StreamExt, secrecy::ExposeSecret, tokio_stream::Stream};

use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    model::{
        ChatMessage, CompletionResponse, ContentPart, LlmProvider, StopReason, StreamEvent,
        ToolCall, Usage, UserContent,
    },
    retry,
};

pub struct OpenAiProvider {
    api_key: secrecy::Secret<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: secrecy::Secret<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": 4096,
            "messages": to_openai_messages(messages),
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        body
    }
}

/// Convert to OpenAI chat format; images ride as `image_url` data URIs.
fn to_openai_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| match msg {
            ChatMessage::System { content } => {
                serde_json::json!({"role": "system", "content": content})
            },
            ChatMessage::User { content } => match content {
                UserContent::Text(text) => {
                    serde_json::json!({"role": "user", "content": text})
                },
                UserContent::Multimodal(parts) => {
                    let blocks: Vec<serde_json::Value> = parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text(text) => {
                                serde_json::json!({"type": "text", "text": text})
                            },
                            ContentPart::Image { media_type, data } => serde_json::json!({
                                "type": "image_url",
                                "image_url": {
                                    "url": format!("data:{media_type};base64,{data}")
                                }
                            }),
                        })
                        .collect();
                    serde_json::json!({"role": "user", "content": blocks})
                },
            },
            ChatMessage::Assistant { content } => serde_json::json!({
                "role": "assistant",
                "content": content.as_deref().unwrap_or(""),
            }),
        })
        .collect()
}

fn parse_finish_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("stop") | None => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        Some(other) => StopReason::Other(other.to_string()),
    }
}

fn parse_tool_calls(message: &serde_json::Value) -> Vec<ToolCall> {
    message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let arguments = call["function"]["arguments"]
                        .as_str()
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or(serde_json::Value::Null);
                    Some(ToolCall {
                        id: call["id"].as_str()?.to_string(),
                        name: call["function"]["name"].as_str()?.to_string(),
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse> {
        let body = self.request_body(messages, false);

        debug!(model = %self.model, messages = messages.len(), "openai complete request");
        trace!(body = %body, "openai request body");

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body);

        let http_resp = retry::send_with_retry("openai", request).await?;

        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(%status, body = %body_text, "openai API error");
            return Err(Error::Api {
                provider: "openai",
                status: status.as_u16(),
                message: body_text,
            });
        }

        let resp = http_resp.json::<serde_json::Value>().await?;
        trace!(response = %resp, "openai raw response");

        let choice = &resp["choices"][0];
        let message = &choice["message"];

        Ok(CompletionResponse {
            text: message["content"].as_str().map(str::to_string),
            tool_calls: parse_tool_calls(message),
            stop_reason: parse_finish_reason(choice["finish_reason"].as_str()),
            usage: Usage {
                input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            },
        })
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let mut body = self.request_body(&messages, true);
            body["stream_options"] = serde_json::json!({"include_usage": true});

            let resp = match self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await
            {
                Ok(r) => {
                    if let Err(e) = r.error_for_status_ref() {
                        let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
                        let body_text = r.text().await.unwrap_or_default();
                        yield StreamEvent::Error(format!("HTTP {status}: {body_text}"));
                        return;
                    }
                    r
                },
                Err(e) => {
                    yield StreamEvent::Error(e.to_string());
                    return;
                },
            };

            let mut byte_stream = resp.bytes_stream();
            let mut buf = String::new();
            let mut usage = Usage::default();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield StreamEvent::Error(e.to_string());
                        return;
                    },
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf = buf[pos + 1..].to_string();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        yield StreamEvent::Done(usage);
                        return;
                    }
                    let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };

                    if let Some(u) = evt["usage"].as_object() {
                        usage = Usage {
                            input_tokens: u
                                .get("prompt_tokens")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(0) as u32,
                            output_tokens: u
                                .get("completion_tokens")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(0) as u32,
                        };
                    }

                    let delta = &evt["choices"][0]["delta"];
                    if let Some(text) = delta["content"].as_str()
                        && !text.is_empty()
                    {
                        yield StreamEvent::Text(text.to_string());
                    }
                    if let Some(calls) = delta["tool_calls"].as_array() {
                        for call in calls {
                            if let Some(partial) = call["function"]["arguments"].as_str() {
                                let index = call["index"].as_u64().unwrap_or(0) as usize;
                                yield StreamEvent::ToolCallDelta {
                                    index,
                                    delta: partial.to_string(),
                                };
                            }
                        }
                    }
                }
            }

            yield StreamEvent::Done(usage);
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_parses_choice_and_usage() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [{
                        "message": {"content": "done"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 7, "completion_tokens": 2}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::new(
            "key".to_string().into(),
            "gpt-4o".into(),
            server.url(),
        );
        let response = provider.complete(&[ChatMessage::user("go")]).await.unwrap();

        assert_eq!(response.text.as_deref(), Some("done"));
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 7);
    }

    #[test]
    fn finish_reasons_map_to_stop_reasons() {
        assert_eq!(parse_finish_reason(Some("stop")), StopReason::EndTurn);
        assert_eq!(parse_finish_reason(Some("length")), StopReason::MaxTokens);
        assert_eq!(parse_finish_reason(Some("tool_calls")), StopReason::ToolUse);
        assert!(matches!(
            parse_finish_reason(Some("content_filter")),
            StopReason::Other(_)
        ));
    }
}
