//! Three-tier security pipeline: static → triage → supervisor.
//!
//! Sits between `tool_call` and tool dispatch whenever untrusted content is
//! read or forwarded. Each tier may short-circuit; every traversal ends in a
//! `security_decision` event recording the path taken. Bash commands get
//! their own deterministic-then-LLM check driven by the policy verdict.

use crate::block::{BlockArena, BlockType, Trust};
use crate::static_tier::{run_static, StaticReport};
use crate::supervisor::{run_supervisor, Action};
use crate::triage::{extract_json, run_triage, SECURITY_DEADLINE};
use serde_json::Value;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vigil_core::event::{BashCheckMeta, DecisionMeta, SecuritySupervisorMeta, StaticCheckMeta, TriageMeta};
use vigil_core::{Event, EventKind, Result, SecurityMode, SessionLog};
use vigil_llm::{chat_with_retry, ChatMessage, ChatRequest, ResolvedModel};

/// One content screening to perform.
pub struct ScreenRequest<'a> {
    pub goal: &'a str,
    pub agent: &'a str,
    pub correlation_id: &'a str,
    pub tool_name: &'a str,
    pub args: &'a Value,
    /// Where the payload came from, e.g. `web_fetch https://…`.
    pub source: &'a str,
    pub content: &'a str,
    /// Parent block ids the payload was derived from.
    pub parents: Vec<String>,
    pub block_type: BlockType,
}

/// Outcome of a screening.
#[derive(Clone, Debug)]
pub struct ScreenOutcome {
    pub action: Action,
    pub reason: String,
    /// Redacted payload when the supervisor chose modify.
    pub replacement: Option<String>,
    /// "static", "static→triage", or "static→triage→supervisor".
    pub check_path: String,
    pub block_id: String,
}

impl ScreenOutcome {
    pub fn is_deny(&self) -> bool {
        self.action == Action::Deny
    }
}

pub struct SecurityPipeline {
    mode: SecurityMode,
    arena: Mutex<BlockArena>,
    triage_model: Option<ResolvedModel>,
    supervisor_model: Option<ResolvedModel>,
}

impl SecurityPipeline {
    pub fn new(mode: SecurityMode) -> Self {
        Self {
            mode,
            arena: Mutex::new(BlockArena::new()),
            triage_model: None,
            supervisor_model: None,
        }
    }

    pub fn with_triage(mut self, model: ResolvedModel) -> Self {
        self.triage_model = Some(model);
        self
    }

    pub fn with_supervisor(mut self, model: ResolvedModel) -> Self {
        self.supervisor_model = Some(model);
        self
    }

    /// Register trusted material (goal prompts, operator inputs) so derived
    /// content can reference it as a parent.
    pub fn ingest_trusted(&self, source: &str, content: &str) -> String {
        self.arena
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Trust::Trusted, BlockType::Instruction, source, content)
    }

    /// Trust level of a block, if it exists.
    pub fn block_trust(&self, id: &str) -> Option<Trust> {
        self.arena
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|b| b.trust)
    }

    /// Screen one untrusted payload through the tiers, emitting the full
    /// event trail. Only the session log I/O can fail.
    pub async fn screen(
        &self,
        log: &SessionLog,
        req: ScreenRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<ScreenOutcome> {
        let (block_id, trust, lineage) = {
            let mut arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
            let id = arena.derive(
                Trust::Untrusted,
                req.block_type,
                req.source,
                req.content,
                &req.parents,
            );
            let trust = arena.get(&id).map(|b| b.trust).unwrap_or(Trust::Untrusted);
            let lineage = arena.lineage(&id);
            (id, trust, lineage)
        };

        let report = run_static(trust, req.content);
        self.emit_static(log, &req, &report, &lineage)?;

        if !report.skip_reason.is_empty() {
            return self.decide(log, &req, &block_id, Action::Allow, "static", &report.skip_reason, None);
        }

        if report.pass && self.mode != SecurityMode::Paranoid {
            return self.decide(log, &req, &block_id, Action::Allow, "static", "no static flags", None);
        }

        // Tier 2: triage.
        let context = format!("goal '{}', pending tool call '{}'", req.goal, req.tool_name);
        let triage = match &self.triage_model {
            Some(model) => {
                run_triage(model, req.content, &context, &report, cancel.clone()).await
            }
            None => crate::triage::TriageOutcome {
                suspicious: true,
                rationale: "no triage model configured".into(),
            },
        };
        log.append(
            self.event(EventKind::SecurityTriage, &req).meta(&TriageMeta {
                suspicious: triage.suspicious,
                rationale: triage.rationale.clone(),
            }),
        )?;

        if !triage.suspicious {
            return self.decide(
                log,
                &req,
                &block_id,
                Action::Allow,
                "static→triage",
                &triage.rationale,
                None,
            );
        }

        // Tier 3: supervisor.
        let outcome = match &self.supervisor_model {
            Some(model) => {
                run_supervisor(
                    model,
                    req.content,
                    &lineage,
                    req.tool_name,
                    req.args,
                    &triage.rationale,
                    cancel,
                )
                .await
            }
            None => crate::supervisor::SupervisorOutcome {
                action: Action::Deny,
                reason: "no supervisor model configured".into(),
                replacement: None,
            },
        };
        log.append(
            self.event(EventKind::SecuritySupervisor, &req)
                .meta(&SecuritySupervisorMeta {
                    action: outcome.action.as_str().to_string(),
                    reason: outcome.reason.clone(),
                    taint_lineage: lineage,
                }),
        )?;

        // The supervisor is the only authority that lifts trust.
        match outcome.action {
            Action::Allow => {
                self.arena
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .reclassify(&block_id, Trust::Vetted);
            }
            Action::Modify => {
                if let Some(replacement) = &outcome.replacement {
                    let mut arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
                    let redacted = arena.derive(
                        Trust::Untrusted,
                        req.block_type,
                        "security supervisor redaction",
                        replacement,
                        &[block_id.clone()],
                    );
                    arena.reclassify(&redacted, Trust::Vetted);
                }
            }
            Action::Deny => {}
        }

        self.decide(
            log,
            &req,
            &block_id,
            outcome.action,
            "static→triage→supervisor",
            &outcome.reason,
            outcome.replacement,
        )
    }

    /// Bash command check: `[deterministic]` from the policy verdict, then an
    /// optional `[llm]` check when the policy was silent. Returns the denial
    /// reason, if any.
    pub async fn check_bash(
        &self,
        log: &SessionLog,
        goal: &str,
        agent: &str,
        correlation_id: &str,
        command: &str,
        policy_verdict: &vigil_tools::BashVerdict,
        cancel: CancellationToken,
    ) -> Result<Option<String>> {
        let bash_event = |check: &str, decision: &str, reason: &str| {
            Event::of(EventKind::BashSecurity)
                .goal(goal)
                .agent(agent)
                .correlation(correlation_id)
                .content(command)
                .meta(&BashCheckMeta {
                    check: check.to_string(),
                    decision: decision.to_string(),
                    reason: reason.to_string(),
                })
        };

        match policy_verdict {
            vigil_tools::BashVerdict::Allow => {
                log.append(bash_event("[deterministic]", "allow", ""))?;
                Ok(None)
            }
            vigil_tools::BashVerdict::Deny { reason } => {
                log.append(bash_event("[deterministic]", "deny", reason))?;
                Ok(Some(reason.clone()))
            }
            vigil_tools::BashVerdict::Ambiguous => {
                log.append(bash_event("[deterministic]", "ambiguous", "no pattern matched"))?;

                let Some(model) = &self.triage_model else {
                    debug!("bash ambiguous and no llm check model, allowing");
                    return Ok(None);
                };

                let prompt = format!(
                    "You review shell commands an autonomous agent wants to run. \
                     Policy patterns neither allowed nor denied this command:\n\n  {}\n\n\
                     Is it safe (no destruction, exfiltration, privilege escalation, or \
                     host escape)? Respond with ONLY a JSON object: \
                     {{\"safe\": true|false, \"reason\": \"<one sentence>\"}}",
                    command
                );
                let request = ChatRequest {
                    model: model.model.clone(),
                    messages: vec![ChatMessage::user(prompt)],
                    max_tokens: Some(256),
                    ..Default::default()
                };
                let verdict = tokio::time::timeout(
                    SECURITY_DEADLINE,
                    chat_with_retry(model.provider.as_ref(), request, cancel),
                )
                .await;

                let (safe, reason) = match verdict {
                    Ok(Ok(response)) => match extract_json(&response.text()) {
                        Some(v) => (
                            v["safe"].as_bool().unwrap_or(false),
                            v["reason"].as_str().unwrap_or("(no reason)").to_string(),
                        ),
                        None => (false, "llm verdict unparseable".to_string()),
                    },
                    Ok(Err(e)) => (false, format!("llm check unavailable: {}", e)),
                    Err(_) => (false, "llm check deadline exceeded".to_string()),
                };

                let decision = if safe { "allow" } else { "deny" };
                log.append(bash_event("[llm]", decision, &reason))?;
                if safe {
                    Ok(None)
                } else {
                    Ok(Some(reason))
                }
            }
        }
    }

    fn event(&self, kind: EventKind, req: &ScreenRequest<'_>) -> Event {
        Event::of(kind)
            .goal(req.goal)
            .agent(req.agent)
            .correlation(req.correlation_id)
            .tool(req.tool_name, req.args.clone())
    }

    fn emit_static(
        &self,
        log: &SessionLog,
        req: &ScreenRequest<'_>,
        report: &StaticReport,
        lineage: &Value,
    ) -> Result<()> {
        log.append(self.event(EventKind::SecurityStatic, req).meta(&StaticCheckMeta {
            pass: report.pass,
            flags: report.flags.clone(),
            entropy: report.entropy,
            skip_reason: report.skip_reason.clone(),
            taint_lineage: lineage.clone(),
        }))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn decide(
        &self,
        log: &SessionLog,
        req: &ScreenRequest<'_>,
        block_id: &str,
        action: Action,
        check_path: &str,
        reason: &str,
        replacement: Option<String>,
    ) -> Result<ScreenOutcome> {
        log.append(self.event(EventKind::SecurityDecision, req).meta(&DecisionMeta {
            action: action.as_str().to_string(),
            check_path: check_path.to_string(),
            reason: reason.to_string(),
        }))?;

        if action == Action::Deny {
            info!(
                tool = req.tool_name,
                block = block_id,
                "security pipeline blocked content: {}",
                reason
            );
            log.append(
                self.event(EventKind::SecurityBlock, req)
                    .content(vigil_core::truncate_marked(req.content, 500))
                    .error_text(reason),
            )?;
        }

        Ok(ScreenOutcome {
            action,
            reason: reason.to_string(),
            replacement,
            check_path: check_path.to_string(),
            block_id: block_id.to_string(),
        })
    }
}
