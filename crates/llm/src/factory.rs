//! Logical model name → provider resolution.

use std::sync::Arc;

use crate::{
    anthropic::AnthropicProvider,
    error::{Error, Result},
    gemini::GeminiProvider,
    model::LlmProvider,
    openai::OpenAiProvider,
};

/// API keys by provider. Project settings take precedence; anything unset
/// falls back to the conventional environment variables.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub gemini: Option<String>,
}

impl ProviderKeys {
    pub fn from_env() -> Self {
        Self {
            anthropic: env_key("ANTHROPIC_API_KEY"),
            openai: env_key("OPENAI_API_KEY"),
            gemini: env_key("GEMINI_API_KEY"),
        }
    }

    /// Overlay: any key present in `self` wins, the rest come from `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            anthropic: self.anthropic.or(other.anthropic),
            openai: self.openai.or(other.openai),
            gemini: self.gemini.or(other.gemini),
        }
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.is_empty())
}

/// Anything that can turn a logical model name into a provider. The
/// production implementation is [`ProviderFactory`]; tests substitute
/// scripted providers.
pub trait LlmResolver: Send + Sync {
    fn resolve(&self, model: &str) -> Result<Arc<dyn LlmProvider>>;
}

pub struct ProviderFactory {
    keys: ProviderKeys,
}

impl ProviderFactory {
    pub fn new(keys: ProviderKeys) -> Self {
        Self { keys }
    }

    pub fn from_env() -> Self {
        Self::new(ProviderKeys::from_env())
    }

}

impl LlmResolver for ProviderFactory {
    /// Resolve a logical model name to a configured provider.
    ///
    /// The family is inferred from the name prefix: `claude-*` is
    /// Anthropic, `gpt-*`/`o*` is OpenAI, `gemini-*` is Google.
    fn resolve(&self, model: &str) -> Result<Arc<dyn LlmProvider>> {
        if model.starts_with("claude") {
            let key = self
                .keys
                .anthropic
                .clone()
                .ok_or(Error::MissingApiKey("anthropic"))?;
            return Ok(Arc::new(AnthropicProvider::new(
                key.into(),
                model.to_string(),
                base_url("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            )));
        }

        if model.starts_with("gpt") || is_openai_reasoning_model(model) {
            let key = self.keys.openai.clone().ok_or(Error::MissingApiKey("openai"))?;
            return Ok(Arc::new(OpenAiProvider::new(
                key.into(),
                model.to_string(),
                base_url("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            )));
        }

        if model.starts_with("gemini") {
            let key = self.keys.gemini.clone().ok_or(Error::MissingApiKey("google"))?;
            return Ok(Arc::new(GeminiProvider::new(
                key.into(),
                model.to_string(),
                base_url("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
            )));
        }

        Err(Error::UnknownModel(model.to_string()))
    }
}

/// `o1`, `o3-mini`, `o4` … but not, say, `opus-large` from some other
/// vendor: a lone `o` followed by a digit.
fn is_openai_reasoning_model(model: &str) -> bool {
    let mut chars = model.chars();
    chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

fn base_url(env: &str, default: &str) -> String {
    std::env::var(env).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn factory_with_all_keys() -> ProviderFactory {
        ProviderFactory::new(ProviderKeys {
            anthropic: Some("ak".into()),
            openai: Some("ok".into()),
            gemini: Some("gk".into()),
        })
    }

    #[test]
    fn model_prefixes_choose_the_provider() {
        let factory = factory_with_all_keys();
        assert_eq!(factory.resolve("claude-sonnet-4").unwrap().name(), "anthropic");
        assert_eq!(factory.resolve("gpt-4o").unwrap().name(), "openai");
        assert_eq!(factory.resolve("o3-mini").unwrap().name(), "openai");
        assert_eq!(factory.resolve("gemini-2.5-flash").unwrap().name(), "google");
    }

    #[test]
    fn unknown_models_are_rejected() {
        let Err(err) = factory_with_all_keys().resolve("llama-3") else {
            panic!("expected an error")
        };
        assert!(matches!(err, Error::UnknownModel(_)));
    }

    #[test]
    fn missing_key_is_distinguished_from_unknown_model() {
        let factory = ProviderFactory::new(ProviderKeys::default());
        let Err(err) = factory.resolve("claude-sonnet-4") else {
            panic!("expected an error")
        };
        assert!(matches!(err, Error::MissingApiKey("anthropic")));
    }

    #[test]
    fn project_keys_overlay_env_keys() {
        let merged = ProviderKeys {
            anthropic: Some("project".into()),
            ..Default::default()
        }
        .or(ProviderKeys {
            anthropic: Some("env".into()),
            openai: Some("env".into()),
            gemini: None,
        });

        assert_eq!(merged.anthropic.as_deref(), Some("project"));
        assert_eq!(merged.openai.as_deref(), Some("env"));
        assert!(merged.gemini.is_none());
    }
}
