//! Retry with exponential backoff for transient provider failures.
//!
//! Rate-limit, overload, and 5xx errors back off 1 s → 60 s (factor 2, five
//! retries). Auth and billing errors are returned immediately.

use crate::provider::{LlmError, LlmProvider, LlmResult};
use crate::types::{ChatRequest, ChatResponse};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Call `provider.chat` with retry. The backoff sleep is cancel-aware.
pub async fn chat_with_retry(
    provider: &dyn LlmProvider,
    request: ChatRequest,
    cancel: CancellationToken,
) -> LlmResult<ChatResponse> {
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 0..=MAX_RETRIES {
        match provider.chat(request.clone(), cancel.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                // A server-provided retry-after can stretch the wait, never
                // shrink it.
                let wait = match &e {
                    LlmError::RateLimited { retry_after_ms } => {
                        backoff.max(Duration::from_millis(*retry_after_ms))
                    }
                    _ => backoff,
                }
                .min(BACKOFF_CEILING);

                warn!(
                    provider = provider.name(),
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "transient llm error, backing off: {}",
                    e
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CEILING);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns")
}
