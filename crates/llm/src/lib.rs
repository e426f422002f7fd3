//! LLM capability for vision: a provider-neutral completion surface with
//! Anthropic, OpenAI, and Google variants, vision prompts, structured
//! extraction, streaming, and transport-level retry.

pub mod anthropic;
pub mod error;
pub mod factory;
pub mod gemini;
pub mod json;
pub mod model;
pub mod openai;
pub mod retry;

pub use {
    anthropic::AnthropicProvider,
    error::{Error as LlmError, Result},
    factory::{LlmResolver, ProviderFactory, ProviderKeys},
    gemini::GeminiProvider,
    model::{
        ChatMessage, CompletionResponse, ContentPart, ImageData, LlmProvider, StopReason,
        StreamEvent, ToolCall, Usage, UserContent,
    },
    openai::OpenAiProvider,
};
