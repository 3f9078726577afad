//! Pluggable LLM provider trait and provider-name resolution.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into backend-specific calls. Stage logic stays decoupled from any
//! particular LLM vendor.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use super::message::{ChatRequest, ChatResponse, TokenUsage};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls, retries)
/// for a specific provider while presenting a uniform interface to stages.
/// Calls must be cancellable: the scheduler wraps them in deadline-bounded
/// futures and drops them on timeout.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. `"openai"`, `"default"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, EngineError>;

    /// Executes a streaming chat completion request.
    ///
    /// Returns a stream of text chunks as they arrive from the provider.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on connection or streaming failures.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>, EngineError>;
}

/// Canonical provider names accepted at the request entry point.
///
/// Aliases collapse: `anthropic` → `claude`, `google` → `gemini`.
/// Unknown names fall back to `default`; only an empty string is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderName {
    /// `OpenAI`-compatible API.
    OpenAi,
    /// Anthropic Claude (served through an OpenAI-compatible surface).
    Claude,
    /// Google Gemini (served through an OpenAI-compatible surface).
    Gemini,
    /// Local Ollama endpoint.
    Ollama,
    /// Deterministic in-process fallback.
    Default,
}

impl ProviderName {
    /// Resolves a raw provider string from a request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidProvider`] when the string is empty
    /// or whitespace. Any other unknown name falls back to
    /// [`ProviderName::Default`].
    pub fn resolve(raw: &str) -> Result<Self, EngineError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidProvider {
                name: raw.to_string(),
            });
        }
        Ok(match trimmed.to_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "claude" | "anthropic" => Self::Claude,
            "google" | "gemini" => Self::Gemini,
            "ollama" => Self::Ollama,
            _ => Self::Default,
        })
    }

    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a provider instance for a resolved name.
///
/// All remote names route through the OpenAI-compatible backend with the
/// configured base URL; when no API key is configured, or for
/// [`ProviderName::Default`], the deterministic [`EchoProvider`] is used
/// so the chain stays runnable offline.
#[must_use]
pub fn create_provider(name: ProviderName, config: &EngineConfig) -> Arc<dyn LlmProvider> {
    match (name, config.api_key.as_deref()) {
        (ProviderName::Default, _) | (_, None) => Arc::new(EchoProvider::new()),
        (_, Some(_)) => Arc::new(super::openai::OpenAiProvider::new(config)),
    }
}

/// Deterministic fallback provider.
///
/// Echoes a condensed form of the last user message. Serves as the
/// `default` provider and as the offline test double: output depends only
/// on input, and usage is the engine's own `ceil(len/4)` estimate.
#[derive(Debug, Default)]
pub struct EchoProvider {
    _private: (),
}

impl EchoProvider {
    /// Creates a new echo provider.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    fn render(request: &ChatRequest) -> String {
        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, super::message::Role::User))
            .map_or("", |m| m.content.as_str());
        if user.is_empty() {
            String::new()
        } else if request.json_mode {
            serde_json::json!({ "echo": user }).to_string()
        } else {
            user.to_string()
        }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, EngineError> {
        let content = Self::render(request);
        let prompt_len: usize = request.messages.iter().map(|m| m.content.len()).sum();
        let estimate = |len: usize| u32::try_from(len.div_ceil(4)).unwrap_or(u32::MAX);
        let usage = TokenUsage {
            prompt_tokens: estimate(prompt_len),
            completion_tokens: estimate(content.len()),
            total_tokens: estimate(prompt_len).saturating_add(estimate(content.len())),
        };
        Ok(ChatResponse {
            content,
            usage,
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>, EngineError> {
        let content = Self::render(request);
        let stream = futures_util::stream::once(async move { Ok(content) });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::{system_message, user_message};

    fn request(user: &str) -> ChatRequest {
        ChatRequest {
            model: "test".to_string(),
            messages: vec![system_message("sys"), user_message(user)],
            temperature: Some(0.0),
            max_tokens: Some(64),
            json_mode: false,
            stream: false,
            tool_names: Vec::new(),
        }
    }

    #[test]
    fn test_resolve_known_names() {
        assert_eq!(
            ProviderName::resolve("openai").ok(),
            Some(ProviderName::OpenAi)
        );
        assert_eq!(
            ProviderName::resolve("Anthropic").ok(),
            Some(ProviderName::Claude)
        );
        assert_eq!(
            ProviderName::resolve("gemini").ok(),
            Some(ProviderName::Gemini)
        );
        assert_eq!(
            ProviderName::resolve("google").ok(),
            Some(ProviderName::Gemini)
        );
        assert_eq!(
            ProviderName::resolve("ollama").ok(),
            Some(ProviderName::Ollama)
        );
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_default() {
        assert_eq!(
            ProviderName::resolve("some-new-vendor").ok(),
            Some(ProviderName::Default)
        );
    }

    #[test]
    fn test_resolve_empty_is_invalid() {
        assert!(ProviderName::resolve("").is_err());
        assert!(ProviderName::resolve("   ").is_err());
    }

    #[tokio::test]
    async fn test_echo_provider_is_deterministic() {
        let provider = EchoProvider::new();
        let a = provider
            .chat(&request("explain CacheManager"))
            .await
            .unwrap_or_else(|e| unreachable!("echo chat failed: {e}"));
        let b = provider
            .chat(&request("explain CacheManager"))
            .await
            .unwrap_or_else(|e| unreachable!("echo chat failed: {e}"));
        assert_eq!(a.content, b.content);
        assert_eq!(a.content, "explain CacheManager");
        assert!(a.usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_echo_provider_json_mode() {
        let provider = EchoProvider::new();
        let mut req = request("hello");
        req.json_mode = true;
        let resp = provider
            .chat(&req)
            .await
            .unwrap_or_else(|e| unreachable!("echo chat failed: {e}"));
        let value: serde_json::Value = serde_json::from_str(&resp.content).unwrap_or_default();
        assert_eq!(value["echo"], "hello");
    }

    #[test]
    fn test_create_provider_without_key_is_echo() {
        let config = EngineConfig::builder().build();
        let provider = create_provider(ProviderName::OpenAi, &config);
        assert_eq!(provider.name(), "default");
    }
}
