use std::pin::Pin;

use {async_trait::async_trait, futures::StreamExt, secrecy::ExposeSecret, tokio_stream::Stream};

use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    model::{
        ChatMessage, CompletionResponse, ContentPart, LlmProvider, StopReason, StreamEvent, Usage,
        UserContent,
    },
    retry,
};

pub struct GeminiProvider {
    api_key: secrecy::Secret<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: secrecy::Secret<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let (system, contents) = to_gemini_contents(messages);

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {"maxOutputTokens": 4096},
        });
        if let Some(system) = system {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        body
    }
}

/// Convert to Gemini content format. System messages feed the top-level
/// `systemInstruction`; assistant turns use the `model` role; images ride
/// as `inlineData` parts.
fn to_gemini_contents(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system: Option<String> = None;
    let mut contents = Vec::new();

    for msg in messages {
        match msg {
            ChatMessage::System { content } => {
                system = Some(match system {
                    Some(existing) => format!("{existing}\n\n{content}"),
                    None => content.clone(),
                });
            },
            ChatMessage::User { content } => {
                let parts: Vec<serde_json::Value> = match content {
                    UserContent::Text(text) => vec![serde_json::json!({"text": text})],
                    UserContent::Multimodal(multimodal) => multimodal
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text(text) => serde_json::json!({"text": text}),
                            ContentPart::Image { media_type, data } => serde_json::json!({
                                "inlineData": {"mimeType": media_type, "data": data}
                            }),
                        })
                        .collect(),
                };
                contents.push(serde_json::json!({"role": "user", "parts": parts}));
            },
            ChatMessage::Assistant { content } => {
                contents.push(serde_json::json!({
                    "role": "model",
                    "parts": [{"text": content.as_deref().unwrap_or("")}],
                }));
            },
        }
    }

    (system, contents)
}

fn parse_finish_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("STOP") | None => StopReason::EndTurn,
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        Some(other) => StopReason::Other(other.to_string()),
    }
}

fn text_of_candidate(candidate: &serde_json::Value) -> Option<String> {
    candidate["content"]["parts"]
        .as_array()?
        .iter()
        .filter_map(|part| part["text"].as_str())
        .map(str::to_string)
        .reduce(|a, b| a + &b)
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse> {
        let body = self.request_body(messages);

        debug!(model = %self.model, messages = messages.len(), "gemini complete request");
        trace!(body = %body, "gemini request body");

        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body);

        let http_resp = retry::send_with_retry("google", request).await?;

        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(%status, body = %body_text, "gemini API error");
            return Err(Error::Api {
                provider: "google",
                status: status.as_u16(),
                message: body_text,
            });
        }

        let resp = http_resp.json::<serde_json::Value>().await?;
        trace!(response = %resp, "gemini raw response");

        let candidate = &resp["candidates"][0];

        Ok(CompletionResponse {
            text: text_of_candidate(candidate),
            tool_calls: Vec::new(),
            stop_reason: parse_finish_reason(candidate["finishReason"].as_str()),
            usage: Usage {
                input_tokens: resp["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0)
                    as u32,
                output_tokens: resp["usageMetadata"]["candidatesTokenCount"]
                    .as_u64()
                    .unwrap_or(0) as u32,
            },
        })
    }

    fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let body = self.request_body(&messages);

            let resp = match self
                .client
                .post(format!(
                    "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                    self.base_url, self.model
                ))
                .header("x-goog-api-key", self.api_key.expose_secret())
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
                    let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };

                    if let Some(u) = evt["usageMetadata"].as_object() {
                        usage = Usage {
                            input_tokens: u
                                .get("promptTokenCount")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(0) as u32,
                            output_tokens: u
                                .get("candidatesTokenCount")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(0) as u32,
                        };
                    }

                    if let Some(text) = text_of_candidate(&evt["candidates"][0])
                        && !text.is_empty()
                    {
                        yield StreamEvent::Text(text);
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

    #[test]
    fn assistant_turns_use_the_model_role() {
        let (system, contents) = to_gemini_contents(&[
            ChatMessage::system("terse"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);

        assert_eq!(system.as_deref(), Some("terse"));
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
    }

    #[tokio::test]
    async fn complete_parses_candidates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                "/v1beta/models/gemini-2.5-flash:generateContent",
            )
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "bonjour"}]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = GeminiProvider::new(
            "key".to_string().into(),
            "gemini-2.5-flash".into(),
            server.url(),
        );
        let response = provider.complete(&[ChatMessage::user("salut")]).await.unwrap();

        assert_eq!(response.text.as_deref(), Some("bonjour"));
        assert_eq!(response.usage.output_tokens, 1);
    }
}
