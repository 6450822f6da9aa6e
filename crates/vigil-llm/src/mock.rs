//! ScriptedProvider — deterministic LLM responses for testing
//!
//! Each call to `chat` pops the next scripted item; an exhausted script
//! returns a default text response. Every request is captured for
//! assertions.

use crate::provider::{LlmError, LlmProvider, LlmResult};
use crate::types::{ChatRequest, ChatResponse, ContentPart};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

enum Script {
    Response(ChatResponse),
    RateLimited(u64),
    Overloaded,
    AuthFailed(String),
    Server(u16),
}

#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    tool_id_counter: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text response.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.push(Script::Response(ChatResponse::text_only(text)));
        self
    }

    /// Queue a response containing one tool call.
    pub fn tool_call(self, name: impl Into<String>, args: Value) -> Self {
        self.tool_calls(vec![(name.into(), args)])
    }

    /// Queue a response containing several tool calls.
    pub fn tool_calls(self, calls: Vec<(String, Value)>) -> Self {
        let parts = {
            let mut counter = self.tool_id_counter.lock().unwrap();
            calls
                .into_iter()
                .map(|(name, input)| {
                    *counter += 1;
                    ContentPart::ToolUse {
                        id: format!("tc-{}", counter),
                        name,
                        input,
                    }
                })
                .collect()
        };
        self.push(Script::Response(ChatResponse {
            content: parts,
            stop_reason: Some("tool_use".into()),
            ..Default::default()
        }));
        self
    }

    /// Queue a fully custom response.
    pub fn response(self, response: ChatResponse) -> Self {
        self.push(Script::Response(response));
        self
    }

    pub fn rate_limited(self, retry_after_ms: u64) -> Self {
        self.push(Script::RateLimited(retry_after_ms));
        self
    }

    pub fn overloaded(self) -> Self {
        self.push(Script::Overloaded);
        self
    }

    pub fn auth_failed(self, message: impl Into<String>) -> Self {
        self.push(Script::AuthFailed(message.into()));
        self
    }

    pub fn server_error(self, status: u16) -> Self {
        self.push(Script::Server(status));
        self
    }

    fn push(&self, item: Script) {
        self.script.lock().unwrap().push_back(item);
    }

    /// Number of chat calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Captured requests, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> LlmResult<ChatResponse> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.requests.lock().unwrap().push(request);

        let item = self.script.lock().unwrap().pop_front();
        match item {
            Some(Script::Response(r)) => Ok(r),
            Some(Script::RateLimited(ms)) => Err(LlmError::RateLimited { retry_after_ms: ms }),
            Some(Script::Overloaded) => Err(LlmError::Overloaded("scripted overload".into())),
            Some(Script::AuthFailed(m)) => Err(LlmError::AuthFailed(m)),
            Some(Script::Server(status)) => Err(LlmError::Server {
                status,
                message: "scripted server error".into(),
            }),
            None => Ok(ChatResponse::text_only("(scripted: exhausted)")),
        }
    }
}
