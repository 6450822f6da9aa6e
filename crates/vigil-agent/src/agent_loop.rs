//! The supervised agent loop: COMMIT → EXECUTE → RECONCILE → SUPERVISE.
//!
//! One loop drives one goal (or one sub-agent's share of a goal). Every
//! iteration re-commits; REORIENT verdicts inject a correction turn and
//! start a new iteration, PAUSE fails the goal with a human-required error.

use crate::commitment::{commit_phase, extract_json, Commitment, Confidence};
use crate::dispatch::Dispatcher;
use crate::env::ExecEnv;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::event::{ExecuteMeta, ReconcileMeta, SuperviseMeta, UsageMeta};
use vigil_core::{truncate_marked, Error, Event, EventKind, Result};
use vigil_llm::{chat_with_retry, ChatMessage, ChatRequest, LlmError};

/// The model states goal completion with this marker.
pub const ACHIEVED_MARKER: &str = "GOAL ACHIEVED";

/// Tools whose use is out of bounds for a low-confidence commitment.
const MUTATING_TOOLS: &[&str] = &["write", "edit", "bash", "memory_write"];

/// Everything one agent loop needs, owned so fan-outs can move it into
/// spawned tasks.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub goal_name: String,
    /// Persona name, empty for a bare goal.
    pub agent_name: String,
    /// "primary", "subagent", or "synthesis".
    pub agent_role: String,
    /// Persona prompt text.
    pub persona: Option<String>,
    /// Restriction from a skill's `allowed-tools`; None = all tools.
    pub allowed_tools: Option<Vec<String>>,
    /// Capability profile name from `REQUIRES`.
    pub profile: Option<String>,
    /// Fully resolved task text ($vars already substituted).
    pub task: String,
    /// Structured output fields required from the final message.
    pub expected_outputs: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct GoalOutcome {
    pub text: String,
    pub structured: Option<Value>,
    pub tool_calls: usize,
    pub achieved: bool,
}

struct ExecSummary {
    final_text: String,
    tools_used: Vec<String>,
    tool_failures: usize,
    tool_calls: usize,
    achieved: bool,
}

#[derive(Debug, PartialEq)]
enum Verdict {
    Continue,
    Reorient(String),
    Pause(String),
}

/// Run the supervised loop for one goal.
pub async fn run_agent_loop(
    env: Arc<ExecEnv>,
    cfg: LoopConfig,
    cancel: CancellationToken,
) -> Result<GoalOutcome> {
    let system = build_system_prompt(&cfg);
    let model = env.model_for(cfg.profile.as_deref()).clone();
    let tool_defs = env.tools.definitions(cfg.allowed_tools.as_deref());
    let tool_names: Vec<String> = tool_defs.iter().map(|d| d.name.clone()).collect();

    env.log.append(
        Event::of(EventKind::System)
            .goal(&cfg.goal_name)
            .agent(&cfg.agent_name)
            .agent_role(&cfg.agent_role)
            .content(truncate_marked(&system, 4096)),
    )?;

    let mut corrections: Vec<String> = Vec::new();
    let mut shape_reorients = 0usize;

    for iteration in 0..=env.max_reorients {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let commitment = commit_phase(
            &env.log,
            &model,
            Some(&system),
            &cfg.goal_name,
            &cfg.agent_name,
            &cfg.agent_role,
            &cfg.task,
            &tool_names,
            cancel.clone(),
        )
        .await?;

        let summary = execute_phase(
            &env,
            &cfg,
            &model,
            &system,
            &tool_defs,
            &corrections,
            cancel.clone(),
        )
        .await?;

        // Structured output contract, checked deterministically.
        let structured = parse_structured(&summary.final_text, &cfg.expected_outputs);
        let shape_broken = !cfg.expected_outputs.is_empty() && structured.is_none();

        let (triggers, escalate) = reconcile(&commitment, &summary, shape_broken);
        env.log.append(
            Event::of(EventKind::PhaseReconcile)
                .goal(&cfg.goal_name)
                .agent(&cfg.agent_name)
                .agent_role(&cfg.agent_role)
                .meta(&ReconcileMeta {
                    triggers: triggers.clone(),
                    escalate,
                }),
        )?;

        if !escalate {
            return Ok(GoalOutcome {
                text: summary.final_text,
                structured,
                tool_calls: summary.tool_calls,
                achieved: summary.achieved,
            });
        }

        let verdict = if shape_broken && triggers.len() == 1 {
            // Broken output shape earns exactly one deterministic REORIENT.
            shape_reorients += 1;
            if shape_reorients > 1 {
                return Err(Error::Internal(format!(
                    "goal '{}' failed to produce fields [{}] after a reorient",
                    cfg.goal_name,
                    cfg.expected_outputs.join(", ")
                )));
            }
            Verdict::Reorient(format!(
                "Fix your output shape: your final message must be a JSON object with the fields: {}.",
                cfg.expected_outputs.join(", ")
            ))
        } else {
            supervise_phase(&env, &cfg, &commitment, &summary, &triggers, cancel.clone()).await?
        };

        let (verdict_name, correction) = match &verdict {
            Verdict::Continue => ("CONTINUE", String::new()),
            Verdict::Reorient(c) => ("REORIENT", c.clone()),
            Verdict::Pause(c) => ("PAUSE", c.clone()),
        };
        env.log.append(
            Event::of(EventKind::PhaseSupervise)
                .goal(&cfg.goal_name)
                .agent(&cfg.agent_name)
                .agent_role(&cfg.agent_role)
                .meta(&SuperviseMeta {
                    verdict: verdict_name.to_string(),
                    correction: correction.clone(),
                    supervisor_type: "execution".to_string(),
                }),
        )?;

        match verdict {
            Verdict::Continue => {
                return Ok(GoalOutcome {
                    text: summary.final_text,
                    structured,
                    tool_calls: summary.tool_calls,
                    achieved: summary.achieved,
                });
            }
            Verdict::Reorient(correction) => {
                info!(
                    goal = %cfg.goal_name,
                    iteration,
                    "supervisor reoriented: {}",
                    correction
                );
                corrections.push(correction);
            }
            Verdict::Pause(reason) => {
                return Err(Error::HumanRequired {
                    goal: cfg.goal_name.clone(),
                    reason: if reason.is_empty() {
                        "supervisor paused execution".to_string()
                    } else {
                        reason
                    },
                });
            }
        }
    }

    Err(Error::Internal(format!(
        "goal '{}' did not converge after {} reorients",
        cfg.goal_name, env.max_reorients
    )))
}

fn build_system_prompt(cfg: &LoopConfig) -> String {
    let mut prompt = String::new();
    if let Some(persona) = &cfg.persona {
        prompt.push_str(persona.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "You complete one goal using the available tools, then stop. \
         When the goal is complete, state GOAL ACHIEVED in your final message.",
    );
    if !cfg.expected_outputs.is_empty() {
        prompt.push_str(&format!(
            "\n\nYour final message must contain a JSON object with the fields: {}.",
            cfg.expected_outputs.join(", ")
        ));
    }
    prompt
}

/// The EXECUTE phase: the tool-call loop. Emits user/assistant events as the
/// conversation grows and one `phase_execute` when it settles.
async fn execute_phase(
    env: &ExecEnv,
    cfg: &LoopConfig,
    model: &vigil_llm::ResolvedModel,
    system: &str,
    tool_defs: &[vigil_llm::ToolDef],
    corrections: &[String],
    cancel: CancellationToken,
) -> Result<ExecSummary> {
    let phase_start = Instant::now();
    let dispatcher = Dispatcher {
        env,
        goal: &cfg.goal_name,
        agent: &cfg.agent_name,
        agent_role: &cfg.agent_role,
        cancel: cancel.clone(),
    };

    let mut messages = vec![ChatMessage::user(cfg.task.clone())];
    env.log.append(
        Event::of(EventKind::User)
            .goal(&cfg.goal_name)
            .agent(&cfg.agent_name)
            .agent_role(&cfg.agent_role)
            .content(truncate_marked(&cfg.task, crate::dispatch::EVENT_CONTENT_CAP)),
    )?;
    for correction in corrections {
        messages.push(ChatMessage::user(correction.clone()));
        env.log.append(
            Event::of(EventKind::User)
                .goal(&cfg.goal_name)
                .agent(&cfg.agent_name)
                .agent_role(&cfg.agent_role)
                .content(correction),
        )?;
    }

    let mut tools_used: Vec<String> = Vec::new();
    let mut tool_failures = 0usize;
    let mut tool_calls = 0usize;
    let mut final_text = String::new();
    let mut achieved = false;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let request = ChatRequest {
            model: model.model.clone(),
            system: Some(system.to_string()),
            messages: messages.clone(),
            tools: Some(tool_defs.to_vec()),
            max_tokens: model.max_tokens.or(Some(8192)),
        };

        let llm_start = Instant::now();
        let response = chat_with_retry(model.provider.as_ref(), request, cancel.clone())
            .await
            .map_err(|e| match e {
                LlmError::Cancelled => Error::Canceled,
                other => Error::Llm(other.to_string()),
            })?;

        let text = response.text();
        env.log.append(
            Event::of(EventKind::Assistant)
                .goal(&cfg.goal_name)
                .agent(&cfg.agent_name)
                .agent_role(&cfg.agent_role)
                .content(truncate_marked(&text, crate::dispatch::EVENT_CONTENT_CAP))
                .duration(llm_start.elapsed().as_millis() as u64)
                .meta(&UsageMeta {
                    model: model.model.clone(),
                    input_tokens: response.usage.input_tokens,
                    output_tokens: response.usage.output_tokens,
                }),
        )?;

        let calls = response.tool_calls();
        if !text.is_empty() {
            final_text = text.clone();
        }
        if text.contains(ACHIEVED_MARKER) {
            achieved = true;
        }

        if calls.is_empty() || achieved {
            break;
        }
        if tool_calls + calls.len() > env.max_tool_calls {
            warn!(
                goal = %cfg.goal_name,
                "tool-call budget ({}) exhausted, ending EXECUTE",
                env.max_tool_calls
            );
            break;
        }

        messages.push(ChatMessage::assistant_parts(response.content.clone()));

        for call in &calls {
            tool_calls += 1;
            if !tools_used.contains(&call.name) {
                tools_used.push(call.name.clone());
            }
            let outcome = dispatcher.dispatch(call).await?;
            if outcome.is_error {
                tool_failures += 1;
            }
            messages.push(ChatMessage::tool_result(
                &call.id,
                &outcome.content,
                outcome.is_error,
            ));
        }
        debug!(goal = %cfg.goal_name, tool_calls, "EXECUTE continues after tool round");
    }

    env.log.append(
        Event::of(EventKind::PhaseExecute)
            .goal(&cfg.goal_name)
            .agent(&cfg.agent_name)
            .agent_role(&cfg.agent_role)
            .duration(phase_start.elapsed().as_millis() as u64)
            .meta(&ExecuteMeta {
                iterations: 1,
                tool_calls,
                result: truncate_marked(&final_text, 2000),
            }),
    )?;

    Ok(ExecSummary {
        final_text,
        tools_used,
        tool_failures,
        tool_calls,
        achieved,
    })
}

/// RECONCILE — deterministic checks of the commitment against what happened.
fn reconcile(
    commitment: &Commitment,
    summary: &ExecSummary,
    shape_broken: bool,
) -> (Vec<String>, bool) {
    let mut triggers = Vec::new();

    if shape_broken {
        triggers.push("output_shape".to_string());
    }
    if summary.tool_failures > 0 {
        triggers.push(format!("tool_failure:{}", summary.tool_failures));
    }
    if !commitment.expected_tools.is_empty() {
        for used in &summary.tools_used {
            if !commitment.expected_tools.contains(used) {
                triggers.push(format!("undeclared_tool:{}", used));
            }
        }
    }
    if commitment.confidence == Confidence::Low {
        for used in &summary.tools_used {
            if MUTATING_TOOLS.contains(&used.as_str()) {
                triggers.push(format!("confidence_bounds:{}", used));
                break;
            }
        }
    }
    if summary.final_text.trim().is_empty() && summary.tool_calls == 0 {
        triggers.push("empty_result".to_string());
    }

    let escalate = !triggers.is_empty();
    (triggers, escalate)
}

/// SUPERVISE — ask the execution supervisor for a verdict on an escalated
/// iteration.
async fn supervise_phase(
    env: &ExecEnv,
    cfg: &LoopConfig,
    commitment: &Commitment,
    summary: &ExecSummary,
    triggers: &[String],
    cancel: CancellationToken,
) -> Result<Verdict> {
    let prompt = format!(
        "You supervise an agent's execution of a goal.\n\n\
         Goal: {}\n\
         Commitment: {} (confidence {}, expected tools [{}])\n\
         Observed: {} tool calls using [{}], {} failures.\n\
         Reconcile triggers: [{}]\n\
         Final message:\n---\n{}\n---\n\n\
         Verdict options: CONTINUE (result is acceptable), REORIENT (send the \
         agent back with a correction), PAUSE (a human must step in).\n\
         Respond with ONLY a JSON object: \
         {{\"verdict\": \"CONTINUE\"|\"REORIENT\"|\"PAUSE\", \"correction\": \"<required for REORIENT>\"}}",
        cfg.task,
        commitment.plan,
        commitment.confidence.as_str(),
        commitment.expected_tools.join(", "),
        summary.tool_calls,
        summary.tools_used.join(", "),
        summary.tool_failures,
        triggers.join(", "),
        truncate_marked(&summary.final_text, 4000),
    );

    let request = ChatRequest {
        model: env.supervisor.model.clone(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: Some(1024),
        ..Default::default()
    };
    let response = chat_with_retry(env.supervisor.provider.as_ref(), request, cancel)
        .await
        .map_err(|e| match e {
            LlmError::Cancelled => Error::Canceled,
            other => Error::Llm(other.to_string()),
        })?;

    let text = response.text();
    let Some(v) = extract_json(&text) else {
        warn!(goal = %cfg.goal_name, "unparseable supervisor verdict, continuing");
        return Ok(Verdict::Continue);
    };
    let correction = v["correction"].as_str().unwrap_or("").to_string();
    Ok(
        match v["verdict"].as_str().unwrap_or("CONTINUE").to_uppercase().as_str() {
            "REORIENT" => Verdict::Reorient(if correction.is_empty() {
                "Re-read the goal and try a different approach.".to_string()
            } else {
                correction
            }),
            "PAUSE" => Verdict::Pause(correction),
            _ => Verdict::Continue,
        },
    )
}

/// Parse the structured output object from the final message. All expected
/// fields must be present.
fn parse_structured(text: &str, expected: &[String]) -> Option<Value> {
    if expected.is_empty() {
        return None;
    }
    let v = extract_json(text)?;
    let obj = v.as_object()?;
    if expected.iter().all(|f| obj.contains_key(f)) {
        Some(v)
    } else {
        None
    }
}
