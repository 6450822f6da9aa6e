//! vigil LLM — provider adapters behind the chat(messages, tools) seam

pub mod anthropic;
pub mod mock;
pub mod profiles;
pub mod provider;
pub mod retry;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use mock::ScriptedProvider;
pub use profiles::ResolvedModel;
pub use provider::{LlmError, LlmProvider, LlmResult};
pub use retry::chat_with_retry;
pub use types::*;
