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

pub struct AnthropicProvider {
    api_key: secrecy::Secret<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: secrecy::Secret<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        let (system_text, anthropic_messages) = to_anthropic_messages(messages);

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": 4096,
            "messages": anthropic_messages,
        });
        if let Some(sys) = system_text {
            body["system"] = serde_json::Value::String(sys);
        }
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        body
    }
}

/// Convert `ChatMessage` list to Anthropic format.
///
/// Returns `(system_text, anthropic_messages)`. System messages are
/// extracted (Anthropic takes them as a top-level `system` field); images
/// become base64 source blocks.
fn to_anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system_text: Option<String> = None;
    let mut out = Vec::new();

    for msg in messages {
        match msg {
            ChatMessage::System { content } => {
                system_text = Some(match system_text {
                    Some(existing) => format!("{existing}\n\n{content}"),
                    None => content.clone(),
                });
            },
            ChatMessage::User { content } => match content {
                UserContent::Text(text) => {
                    out.push(serde_json::json!({"role": "user", "content": text}));
                },
                UserContent::Multimodal(parts) => {
                    let blocks: Vec<serde_json::Value> = parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text(text) => {
                                serde_json::json!({"type": "text", "text": text})
                            },
                            ContentPart::Image { media_type, data } => {
                                serde_json::json!({
                                    "type": "image",
                                    "source": {
                                        "type": "base64",
                                        "media_type": media_type,
                                        "data": data,
                                    }
                                })
                            },
                        })
                        .collect();
                    out.push(serde_json::json!({"role": "user", "content": blocks}));
                },
            },
            ChatMessage::Assistant { content } => {
                out.push(serde_json::json!({
                    "role": "assistant",
                    "content": content.as_deref().unwrap_or(""),
                }));
            },
        }
    }

    (system_text, out)
}

fn parse_stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("end_turn") | None => StopReason::EndTurn,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("tool_use") => StopReason::ToolUse,
        Some(other) => StopReason::Other(other.to_string()),
    }
}

/// Parse tool_use blocks from an Anthropic response.
fn parse_tool_calls(content: &[serde_json::Value]) -> Vec<ToolCall> {
    content
        .iter()
        .filter_map(|block| {
            if block["type"].as_str() == Some("tool_use") {
                Some(ToolCall {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: block["input"].clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse> {
        let body = self.request_body(messages, false);

        debug!(model = %self.model, messages = messages.len(), "anthropic complete request");
        trace!(body = %body, "anthropic request body");

        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);

        let http_resp = retry::send_with_retry("anthropic", request).await?;

        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(%status, body = %body_text, "anthropic API error");
            return Err(Error::Api {
                provider: "anthropic",
                status: status.as_u16(),
                message: body_text,
            });
        }

        let resp = http_resp.json::<serde_json::Value>().await?;
        trace!(response = %resp, "anthropic raw response");

        let content = resp["content"].as_array().cloned().unwrap_or_default();
        let text = content
            .iter()
            .filter_map(|b| {
                if b["type"].as_str() == Some("text") {
                    b["text"].as_str().map(str::to_string)
                } else {
                    None
                }
            })
            .reduce(|a, b| a + &b);

        let usage = Usage {
            input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(CompletionResponse {
            text,
            tool_calls: parse_tool_calls(&content),
            stop_reason: parse_stop_reason(resp["stop_reason"].as_str()),
            usage,
        })
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let body = self.request_body(&messages, true);

            let resp = match self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
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
            let mut input_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield StreamEvent::Error(e.to_string());
                        return;
                    },
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find("\n\n") {
                    let block = buf[..pos].to_string();
                    buf = buf[pos + 2..].to_string();

                    for line in block.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                            continue;
                        };

                        match evt["type"].as_str().unwrap_or("") {
                            "content_block_delta" => {
                                let delta = &evt["delta"];
                                match delta["type"].as_str().unwrap_or("") {
                                    "text_delta" => {
                                        if let Some(text) = delta["text"].as_str()
                                            && !text.is_empty()
                                        {
                                            yield StreamEvent::Text(text.to_string());
                                        }
                                    },
                                    "input_json_delta" => {
                                        if let Some(partial) = delta["partial_json"].as_str() {
                                            let index =
                                                evt["index"].as_u64().unwrap_or(0) as usize;
                                            yield StreamEvent::ToolCallDelta {
                                                index,
                                                delta: partial.to_string(),
                                            };
                                        }
                                    },
                                    _ => {},
                                }
                            },
                            "message_start" => {
                                if let Some(v) =
                                    evt["message"]["usage"]["input_tokens"].as_u64()
                                {
                                    input_tokens = v as u32;
                                }
                            },
                            "message_delta" => {
                                if let Some(v) = evt["usage"]["output_tokens"].as_u64() {
                                    output_tokens = v as u32;
                                }
                            },
                            "message_stop" => {
                                yield StreamEvent::Done(Usage {
                                    input_tokens,
                                    output_tokens,
                                });
                                return;
                            },
                            "error" => {
                                let msg = evt["error"]["message"]
                                    .as_str()
                                    .unwrap_or("unknown error");
                                yield StreamEvent::Error(msg.to_string());
                                return;
                            },
                            _ => {},
                        }
                    }
                }
            }
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageData;

    fn provider(base_url: String) -> AnthropicProvider {
        AnthropicProvider::new("test-key".to_string().into(), "claude-sonnet-4".into(), base_url)
    }

    #[test]
    fn system_messages_are_lifted_out() {
        let (system, messages) = to_anthropic_messages(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ]);

        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn images_become_base64_source_blocks() {
        let message = ChatMessage::user_with_image("what is this?", ImageData::from_bytes(b"png"));
        let (_, messages) = to_anthropic_messages(&[message]);

        let blocks = messages[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "image");
        assert_eq!(blocks[0]["source"]["type"], "base64");
        assert_eq!(blocks[1]["type"], "text");
    }

    #[tokio::test]
    async fn complete_parses_text_usage_and_stop_reason() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", "2023-06-01")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "content": [{"type": "text", "text": "hello there"}],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 12, "output_tokens": 5}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = provider(server.url())
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.text.as_deref(), Some("hello there"));
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn api_errors_surface_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(400)
            .with_body("{\"error\": \"bad request\"}")
            .create_async()
            .await;

        let err = provider(server.url())
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();

        match err {
            Error::Api { provider, status, .. } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(status, 400);
            },
            other => panic!("unexpected error {other}"),
        }
    }
}
