//! Provider-neutral request and response types.

use std::pin::Pin;

use {async_trait::async_trait, tokio_stream::Stream};

use crate::error::Result;

/// Events emitted during streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text content delta.
    Text(String),
    /// Streaming fragment of a tool call's JSON arguments.
    ToolCallDelta {
        /// Index of the tool call this delta belongs to.
        index: usize,
        /// JSON fragment to append.
        delta: String,
    },
    /// Stream completed successfully.
    Done(Usage),
    /// An error occurred mid-stream.
    Error(String),
}

/// One content part of a multimodal user message.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    /// Base64 image data with its media type.
    Image { media_type: String, data: String },
}

#[derive(Debug, Clone)]
pub enum UserContent {
    Text(String),
    Multimodal(Vec<ContentPart>),
}

#[derive(Debug, Clone)]
pub enum ChatMessage {
    System { content: String },
    User { content: UserContent },
    Assistant { content: Option<String> },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: UserContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
        }
    }

    /// A user message carrying a prompt plus one base64 PNG image.
    pub fn user_with_image(prompt: impl Into<String>, image: ImageData) -> Self {
        Self::User {
            content: UserContent::Multimodal(vec![
                ContentPart::Image {
                    media_type: image.media_type,
                    data: image.base64,
                },
                ContentPart::Text(prompt.into()),
            ]),
        }
    }
}

/// Image bytes on their way to a vision prompt. Providers all speak
/// base64, so raw bytes are encoded once here.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub media_type: String,
    pub base64: String,
}

impl ImageData {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        use base64::Engine;
        Self {
            media_type: "image/png".into(),
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn from_base64(data: impl Into<String>) -> Self {
        Self {
            media_type: "image/png".into(),
            base64: data.into(),
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Other(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Uniform provider response.
#[derive(Debug)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// LLM provider capability (Anthropic, OpenAI, Google).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Model identifier (e.g. "claude-sonnet-4", "gpt-4o").
    fn model(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse>;

    /// Stream a completion, yielding text/tool-call/done events.
    fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>>;

    /// Vision call: a prompt over one image.
    async fn analyze_image(&self, image: ImageData, prompt: &str) -> Result<CompletionResponse> {
        self.complete(&[ChatMessage::user_with_image(prompt, image)]).await
    }

    /// Ask for output conforming to a JSON schema and parse it.
    async fn extract_structured(
        &self,
        text: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let prompt = format!(
            "Extract data from the following content. Respond with a single JSON \
             object matching this JSON schema, and nothing else.\n\nSchema:\n{schema}\n\n\
             Content:\n{text}"
        );
        let response = self.complete(&[ChatMessage::user(prompt)]).await?;
        let raw = response.text.unwrap_or_default();
        crate::json::first_json_object(&raw).ok_or(crate::error::Error::NoJsonFound)
    }
}
