//! `OpenAI`-compatible provider implementation using the `async-openai` crate.
//!
//! Serves every remote provider name: `openai` directly, `ollama` and the
//! claude/gemini gateways via the base URL override in [`EngineConfig`].

use std::pin::Pin;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionStreamResponse, ResponseFormat,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use super::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use super::provider::LlmProvider;
use crate::config::EngineConfig;
use crate::error::EngineError;

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions. Compatible with
/// any API that follows the `OpenAI` chat completion spec.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// Creates a new provider from engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let mut openai_config = OpenAIConfig::new();
        if let Some(ref key) = config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        if let Some(ref base_url) = config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }
        Self {
            client: Client::with_config(openai_config),
        }
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: async_openai::types::ChatCompletionRequestSystemMessageContent::Text(
                        msg.content.clone(),
                    ),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: async_openai::types::ChatCompletionRequestUserMessageContent::Text(
                    msg.content.clone(),
                ),
                name: None,
            }),
            Role::Assistant => {
                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(
                    async_openai::types::ChatCompletionRequestAssistantMessage {
                        content: Some(
                            async_openai::types::ChatCompletionRequestAssistantMessageContent::Text(
                                msg.content.clone(),
                            ),
                        ),
                        name: None,
                        tool_calls: None,
                        refusal: None,
                        audio: None,
                        function_call: None,
                    },
                )
            }
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    ///
    /// Approved tool names are appended to the system turn; the gate owns
    /// discovery and invocation, so the model only needs the allow-list.
    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let mut messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        if !request.tool_names.is_empty() {
            let tool_note = format!(
                "Tools approved for this request: {}.",
                request.tool_names.join(", ")
            );
            messages.push(Self::convert_message(&ChatMessage {
                role: Role::System,
                content: tool_note,
            }));
        }

        let response_format = if request.json_mode {
            Some(ResponseFormat::JsonObject)
        } else {
            None
        };

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature.filter(|&t| t != 0.0),
            max_completion_tokens: request.max_tokens,
            stream: if request.stream { Some(true) } else { None },
            response_format,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, EngineError> {
        let openai_request = Self::build_request(request);

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| EngineError::ApiRequest {
                message: e.to_string(),
                status: None,
            })?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            usage,
            finish_reason,
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>, EngineError> {
        let mut stream_request = request.clone();
        stream_request.stream = true;
        let openai_request = Self::build_request(&stream_request);

        let stream = self
            .client
            .chat()
            .create_stream(openai_request)
            .await
            .map_err(|e| EngineError::ApiRequest {
                message: e.to_string(),
                status: None,
            })?;

        let mapped = stream.map(
            |result: Result<
                CreateChatCompletionStreamResponse,
                async_openai::error::OpenAIError,
            >| {
                match result {
                    Ok(response) => {
                        let text = response
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_ref())
                            .cloned()
                            .unwrap_or_default();
                        Ok(text)
                    }
                    Err(e) => Err(EngineError::Stream {
                        message: e.to_string(),
                    }),
                }
            },
        );

        Ok(Box::pin(mapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::{system_message, user_message};

    fn request(tool_names: Vec<String>) -> ChatRequest {
        ChatRequest {
            model: "gpt-5-mini-2025-08-07".to_string(),
            messages: vec![system_message("route"), user_message("test")],
            temperature: Some(0.0),
            max_tokens: Some(100),
            json_mode: false,
            stream: false,
            tool_names,
        }
    }

    #[test]
    fn test_convert_system_message() {
        let msg = system_message("test");
        let converted = OpenAiProvider::convert_message(&msg);
        assert!(matches!(converted, ChatCompletionRequestMessage::System(_)));
    }

    #[test]
    fn test_convert_user_message() {
        let msg = user_message("hello");
        let converted = OpenAiProvider::convert_message(&msg);
        assert!(matches!(converted, ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_build_request_appends_tool_note() {
        let built = OpenAiProvider::build_request(&request(vec![
            "weather".to_string(),
            "datetime".to_string(),
        ]));
        // system + user + appended tool-note system turn
        assert_eq!(built.messages.len(), 3);
    }

    #[test]
    fn test_build_request_no_tools_no_extra_turn() {
        let built = OpenAiProvider::build_request(&request(Vec::new()));
        assert_eq!(built.messages.len(), 2);
        assert!(built.response_format.is_none());
    }

    #[test]
    fn test_build_request_json_mode() {
        let mut req = request(Vec::new());
        req.json_mode = true;
        let built = OpenAiProvider::build_request(&req);
        assert!(built.response_format.is_some());
    }

    #[test]
    fn test_build_request_streaming() {
        let mut req = request(Vec::new());
        req.stream = true;
        let built = OpenAiProvider::build_request(&req);
        assert_eq!(built.stream, Some(true));
    }
}
