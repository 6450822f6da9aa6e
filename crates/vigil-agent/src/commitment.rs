//! COMMIT phase — the model declares intent before touching anything.
//!
//! The commitment is the contract RECONCILE later measures execution
//! against: a short plan, the tools it expects to call, and a confidence
//! level that bounds how much mutation the loop will tolerate.

use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use vigil_core::event::CommitMeta;
use vigil_core::{Event, EventKind, Result};
use vigil_llm::{chat_with_retry, ChatMessage, ChatRequest, ResolvedModel};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Commitment {
    pub plan: String,
    pub expected_tools: Vec<String>,
    pub confidence: Confidence,
}

/// Extract the first JSON object from model output, tolerating code fences
/// and surrounding prose.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'"' if !escaped => in_string = !in_string,
            b'\\' if in_string => {
                escaped = !escaped;
                continue;
            }
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..=i]).ok();
                }
            }
            _ => {}
        }
        escaped = false;
    }
    None
}

fn commit_prompt(task: &str, tool_names: &[String]) -> String {
    format!(
        "Before you start, declare your intent for this goal.\n\n\
         Goal:\n{}\n\n\
         Available tools: {}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"plan\": \"<2-3 sentence plan>\", \"expected_tools\": [\"tool\", …], \
         \"confidence\": \"high\"|\"medium\"|\"low\"}}",
        task,
        tool_names.join(", ")
    )
}

/// Run the COMMIT phase: one LLM round-trip, one `phase_commit` event.
/// A malformed declaration degrades to a medium-confidence commitment built
/// from the raw text rather than failing the goal.
#[allow(clippy::too_many_arguments)]
pub async fn commit_phase(
    log: &vigil_core::SessionLog,
    model: &ResolvedModel,
    system: Option<&str>,
    goal: &str,
    agent: &str,
    agent_role: &str,
    task: &str,
    tool_names: &[String],
    cancel: CancellationToken,
) -> Result<Commitment> {
    let started = Instant::now();
    let request = ChatRequest {
        model: model.model.clone(),
        system: system.map(String::from),
        messages: vec![ChatMessage::user(commit_prompt(task, tool_names))],
        max_tokens: Some(1024),
        ..Default::default()
    };

    let response = chat_with_retry(model.provider.as_ref(), request, cancel)
        .await
        .map_err(|e| match e {
            vigil_llm::LlmError::Cancelled => vigil_core::Error::Canceled,
            other => vigil_core::Error::Llm(other.to_string()),
        })?;

    let text = response.text();
    let commitment = match extract_json(&text) {
        Some(v) => Commitment {
            plan: v["plan"].as_str().unwrap_or(&text).to_string(),
            expected_tools: v["expected_tools"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            confidence: Confidence::parse(v["confidence"].as_str().unwrap_or("medium")),
        },
        None => Commitment {
            plan: text.clone(),
            expected_tools: Vec::new(),
            confidence: Confidence::Medium,
        },
    };

    log.append(
        Event::of(EventKind::PhaseCommit)
            .goal(goal)
            .agent(agent)
            .agent_role(agent_role)
            .duration(started.elapsed().as_millis() as u64)
            .meta(&CommitMeta {
                commitment: commitment.plan.clone(),
                confidence: commitment.confidence.as_str().to_string(),
                expected_tools: commitment.expected_tools.clone(),
            }),
    )?;

    Ok(commitment)
}
