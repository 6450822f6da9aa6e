//! Tool dispatch — the correlated tool_call/tool_result pair with security
//! and policy in between.
//!
//! Order per call: `tool_call` event, bash checks (bash only), policy check,
//! registry dispatch, security screen of untrusted results, `tool_result`
//! event. Every event in the chain shares one correlation id. Denials are
//! recovered errors: the model sees a failed tool result and may adapt.

use crate::env::ExecEnv;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vigil_core::{new_correlation_id, truncate_marked, Error, Event, EventKind, Result};
use vigil_llm::ToolInvocation;
use vigil_security::{Action, BlockType, ScreenRequest};
use vigil_tools::Verdict;

/// Content cap for event payloads; full payloads stay in run state.
pub const EVENT_CONTENT_CAP: usize = 16 * 1024;
/// Cap for tool results fed back into the conversation.
pub const CONVERSATION_RESULT_CAP: usize = 50_000;

/// Outcome of one dispatched tool call, as fed back to the model.
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    pub content: String,
    pub is_error: bool,
}

pub struct Dispatcher<'a> {
    pub env: &'a ExecEnv,
    pub goal: &'a str,
    pub agent: &'a str,
    pub agent_role: &'a str,
    pub cancel: CancellationToken,
}

impl Dispatcher<'_> {
    fn event(&self, kind: EventKind) -> Event {
        Event::of(kind)
            .goal(self.goal)
            .agent(self.agent)
            .agent_role(self.agent_role)
    }

    /// Dispatch one tool call end to end.
    pub async fn dispatch(&self, call: &ToolInvocation) -> Result<DispatchOutcome> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let correlation = new_correlation_id();
        self.env.log.append(
            self.event(EventKind::ToolCall)
                .correlation(&correlation)
                .tool(&call.name, call.args.clone()),
        )?;

        // Bash gets its own deterministic-then-LLM check before anything runs.
        if call.name == "bash" {
            let command = call.args.get("command").and_then(|v| v.as_str()).unwrap_or("");
            let verdict = self.env.policy.check_bash(command);
            let denial = self
                .env
                .security
                .check_bash(
                    &self.env.log,
                    self.goal,
                    self.agent,
                    &correlation,
                    command,
                    &verdict,
                    self.cancel.clone(),
                )
                .await?;
            if let Some(reason) = denial {
                return self.finish_denied(&correlation, &call.name, "bash check", &reason);
            }
        }

        // Policy gate.
        if let Verdict::Deny { reason } = self.env.policy.check(&call.name, &call.args) {
            return self.finish_denied(&correlation, &call.name, "policy", &reason);
        }

        // Registry dispatch.
        let started = Instant::now();
        let result = self
            .env
            .tools
            .invoke_cancellable(&call.name, call.args.clone(), self.cancel.clone())
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let mut is_error = result.is_error();
        let mut content = result.to_content_string();
        let mut error = result.error_message().unwrap_or("").to_string();

        // Untrusted results traverse the security pipeline before the model
        // sees them.
        if !is_error && self.env.tools.is_untrusted_source(&call.name) {
            let source = describe_source(call);
            let outcome = self
                .env
                .security
                .screen(
                    &self.env.log,
                    ScreenRequest {
                        goal: self.goal,
                        agent: self.agent,
                        correlation_id: &correlation,
                        tool_name: &call.name,
                        args: &call.args,
                        source: &source,
                        content: &content,
                        parents: Vec::new(),
                        block_type: BlockType::Data,
                    },
                    self.cancel.clone(),
                )
                .await?;
            match outcome.action {
                Action::Deny => {
                    is_error = true;
                    error = format!("security denied {}: {}", call.name, outcome.reason);
                    content = error.clone();
                }
                Action::Modify => {
                    if let Some(replacement) = outcome.replacement {
                        debug!(tool = %call.name, "security supervisor redacted tool output");
                        content = replacement;
                    }
                }
                Action::Allow => {}
            }
        }

        self.env.log.append(
            self.event(EventKind::ToolResult)
                .correlation(&correlation)
                .tool(&call.name, call.args.clone())
                .success(!is_error)
                .error_text(&error)
                .duration(duration_ms)
                .content(truncate_marked(&content, EVENT_CONTENT_CAP)),
        )?;

        Ok(DispatchOutcome {
            content: truncate_marked(&content, CONVERSATION_RESULT_CAP),
            is_error,
        })
    }

    fn finish_denied(
        &self,
        correlation: &str,
        tool: &str,
        gate: &str,
        reason: &str,
    ) -> Result<DispatchOutcome> {
        let error = format!("{} denied {}: {}", gate, tool, reason);
        self.env.log.append(
            self.event(EventKind::ToolResult)
                .correlation(correlation)
                .tool(tool, serde_json::Value::Null)
                .success(false)
                .error_text(&error)
                .content(&error),
        )?;
        Ok(DispatchOutcome {
            content: error,
            is_error: true,
        })
    }
}

fn describe_source(call: &ToolInvocation) -> String {
    let subject = call
        .args
        .get("url")
        .or_else(|| call.args.get("query"))
        .or_else(|| call.args.get("file_path"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if subject.is_empty() {
        call.name.clone()
    } else {
        format!("{} {}", call.name, subject)
    }
}
