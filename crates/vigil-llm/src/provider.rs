//! LLM Provider trait

use crate::types::{ChatRequest, ChatResponse};
use tokio_util::sync::CancellationToken;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("billing error: {0}")]
    Billing(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl LlmError {
    /// Rate-limit, overload, and 5xx responses are retried with backoff.
    /// Auth and billing failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Overloaded(_) | Self::Server { .. }
        )
    }
}

/// LLM Provider trait — the `chat(messages, tools) → response` seam.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One complete round-trip. If `cancel` is triggered, the in-flight
    /// request is dropped and the call yields `LlmError::Cancelled`.
    async fn chat(&self, request: ChatRequest, cancel: CancellationToken)
        -> LlmResult<ChatResponse>;
}
