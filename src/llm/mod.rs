//! Provider-agnostic LLM layer.
//!
//! The chain treats the model as an abstract callable: build a
//! [`ChatRequest`], hand it to an [`LlmProvider`], get text and token usage
//! back. Provider names from the request entry point resolve through
//! [`ProviderName::resolve`]; unknown names fall back to the deterministic
//! echo provider so the engine stays available offline.

pub mod message;
pub mod openai;
pub mod provider;

pub use message::{
    ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, assistant_message, system_message,
    user_message,
};
pub use openai::OpenAiProvider;
pub use provider::{EchoProvider, LlmProvider, ProviderName, create_provider};
