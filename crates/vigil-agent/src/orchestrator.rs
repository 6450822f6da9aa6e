//! Orchestrator — drives workflow steps over agent loops.
//!
//! RUN steps execute their goals in order; a goal naming several agents
//! fans out into parallel isolated loops whose outputs are joined in
//! declaration order and handed to a synthesis loop. LOOP steps repeat
//! until the goal signals achieved, no tools were called, the state
//! fingerprint stops moving, or the WITHIN cap is reached.

use crate::agent_loop::{run_agent_loop, GoalOutcome, LoopConfig};
use crate::env::ExecEnv;
use crate::state::RunState;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_core::{truncate_marked, Error, Event, EventKind, Result, SessionStatus};
use vigil_workflow::{interpolate, AgentDef, GoalDef, StepKind, Workflow};

/// Final state of a run, as reported to the user.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub status: SessionStatus,
    pub result: String,
    pub error: String,
}

pub struct Orchestrator {
    env: Arc<ExecEnv>,
    workflow: Arc<Workflow>,
    state: RunState,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Bind inputs and verify every capability profile resolves. Inputs with
    /// neither an override nor a default are an error.
    pub fn new(
        env: Arc<ExecEnv>,
        workflow: Workflow,
        input_overrides: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut inputs = HashMap::new();
        for input in &workflow.inputs {
            let value = input_overrides
                .get(&input.name)
                .cloned()
                .or_else(|| input.default.clone())
                .ok_or_else(|| {
                    Error::config(format!(
                        "input '{}' has no default and no override",
                        input.name
                    ))
                })?;
            inputs.insert(input.name.clone(), value);
        }

        for agent in &workflow.agents {
            if let Some(profile) = &agent.profile {
                if !env.profiles.contains_key(profile) {
                    return Err(Error::config(format!(
                        "agent '{}' requires unknown capability profile '{}'",
                        agent.name, profile
                    )));
                }
            }
        }

        Ok(Self {
            env,
            workflow: Arc::new(workflow),
            state: RunState::new(inputs),
            cancel,
        })
    }

    /// Execute the workflow to completion. All goal-level failures are
    /// captured in the returned outcome; only session-log I/O failures
    /// propagate as errors.
    pub async fn run(mut self) -> Result<RunOutcome> {
        self.env.log.append(
            Event::of(EventKind::WorkflowStart)
                .content(self.workflow.name.clone())
                .meta(&json!({"inputs": self.state.inputs})),
        )?;

        let result = self.run_steps().await;

        let outcome = match result {
            Ok(result_text) => {
                self.env.log.append(
                    Event::of(EventKind::WorkflowEnd)
                        .success(true)
                        .content(truncate_marked(&result_text, 2000)),
                )?;
                RunOutcome {
                    status: SessionStatus::Complete,
                    result: result_text,
                    error: String::new(),
                }
            }
            Err(e) => {
                let error = e.to_string();
                warn!("workflow '{}' failed: {}", self.workflow.name, error);
                self.env.log.append(
                    Event::of(EventKind::WorkflowEnd)
                        .success(false)
                        .error_text(&error),
                )?;
                RunOutcome {
                    status: SessionStatus::Failed,
                    result: String::new(),
                    error,
                }
            }
        };

        self.env.log.seal(
            outcome.status,
            outcome.result.clone(),
            outcome.error.clone(),
            Value::Object(self.state.outputs.clone()),
            Value::Object(self.state.state.clone()),
        )?;
        Ok(outcome)
    }

    async fn run_steps(&mut self) -> Result<String> {
        let workflow = self.workflow.clone();
        let mut last_text = String::new();

        for step in &workflow.steps {
            if self.cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            match step.kind {
                StepKind::Run => {
                    for goal_name in &step.goals {
                        let outcome = self.run_goal(goal_name, &step.name).await?;
                        last_text = outcome.text;
                    }
                }
                StepKind::Loop => {
                    last_text = self.run_loop_step(step).await?;
                }
            }
        }
        Ok(last_text)
    }

    fn loop_cap(&self, step: &vigil_workflow::Step) -> Result<u64> {
        if let Some(limit) = step.within_limit {
            return Ok(limit);
        }
        let var = step.within_var.as_deref().unwrap_or_default();
        let raw = self.state.inputs.get(var).ok_or_else(|| {
            Error::config(format!("LOOP '{}' cap input '{}' is unbound", step.name, var))
        })?;
        raw.parse::<u64>().map_err(|_| {
            Error::config(format!(
                "LOOP '{}' cap '{}' = '{}' is not a number",
                step.name, var, raw
            ))
        })
    }

    async fn run_loop_step(&mut self, step: &vigil_workflow::Step) -> Result<String> {
        let cap = self.loop_cap(step)?;
        let mut last_text = String::new();
        let mut prev_fingerprint = self.state.fingerprint(&step.goals);

        for iteration in 1..=cap {
            if self.cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            let mut achieved = false;
            let mut tool_calls = 0usize;
            for goal_name in &step.goals {
                let outcome = self.run_goal(goal_name, &step.name).await?;
                achieved |= outcome.achieved;
                tool_calls += outcome.tool_calls;
                last_text = outcome.text;
            }

            let fingerprint = self.state.fingerprint(&step.goals);
            self.env.log.append(
                Event::of(EventKind::Checkpoint)
                    .step(&step.name)
                    .content(format!("iteration {}/{}", iteration, cap))
                    .meta(&json!({
                        "iteration": iteration,
                        "cap": cap,
                        "fingerprint": format!("{:016x}", fingerprint),
                        "tool_calls": tool_calls,
                        "achieved": achieved,
                    })),
            )?;

            if achieved {
                info!(step = %step.name, iteration, "loop goal achieved");
                break;
            }
            if tool_calls == 0 {
                info!(step = %step.name, iteration, "loop made no tool calls, stopping");
                break;
            }
            if fingerprint == prev_fingerprint {
                info!(step = %step.name, iteration, "loop state unchanged, stopping");
                break;
            }
            prev_fingerprint = fingerprint;
        }
        Ok(last_text)
    }

    async fn run_goal(&mut self, goal_name: &str, step_name: &str) -> Result<GoalOutcome> {
        let goal = self
            .workflow
            .goal(goal_name)
            .ok_or_else(|| Error::Internal(format!("unvalidated goal '{}'", goal_name)))?
            .clone();

        let task = interpolate(&goal.outcome, &self.state.vars())?;
        let started = Instant::now();
        let goal_seq = self.env.log.append(
            Event::of(EventKind::GoalStart)
                .goal(&goal.name)
                .step(step_name)
                .content(truncate_marked(&task, 2000)),
        )?;

        let result = self.execute_goal(&goal, &task, goal_seq).await;

        match &result {
            Ok(outcome) => {
                self.state
                    .record_goal(&goal.name, &outcome.text, outcome.structured.as_ref());
                self.env.log.append(
                    Event::of(EventKind::GoalEnd)
                        .goal(&goal.name)
                        .step(step_name)
                        .success(true)
                        .duration(started.elapsed().as_millis() as u64)
                        .content(truncate_marked(&outcome.text, 2000)),
                )?;
            }
            Err(e) => {
                self.env.log.append(
                    Event::of(EventKind::GoalEnd)
                        .goal(&goal.name)
                        .step(step_name)
                        .success(false)
                        .duration(started.elapsed().as_millis() as u64)
                        .error_text(e.to_string()),
                )?;
            }
        }
        result
    }

    async fn execute_goal(&self, goal: &GoalDef, task: &str, goal_seq: u64) -> Result<GoalOutcome> {
        let agents: Vec<AgentDef> = goal
            .using
            .iter()
            .filter_map(|name| self.workflow.agent(name).cloned())
            .collect();

        match agents.len() {
            0 => {
                run_agent_loop(
                    self.env.clone(),
                    LoopConfig {
                        goal_name: goal.name.clone(),
                        agent_name: String::new(),
                        agent_role: "primary".to_string(),
                        persona: None,
                        allowed_tools: None,
                        profile: None,
                        task: task.to_string(),
                        expected_outputs: goal.outputs.clone(),
                    },
                    self.cancel.clone(),
                )
                .await
            }
            1 => {
                let agent = &agents[0];
                run_agent_loop(
                    self.env.clone(),
                    LoopConfig {
                        goal_name: goal.name.clone(),
                        agent_name: agent.name.clone(),
                        agent_role: "primary".to_string(),
                        persona: persona_of(agent, &self.state)?,
                        allowed_tools: allowed_tools_of(agent),
                        profile: agent.profile.clone(),
                        task: task.to_string(),
                        expected_outputs: goal.outputs.clone(),
                    },
                    self.cancel.clone(),
                )
                .await
            }
            _ => self.fan_out(goal, task, &agents, goal_seq).await,
        }
    }

    /// N>1 agents: parallel isolated loops, outputs joined in declaration
    /// order, then one synthesis loop over the tuple of outputs.
    async fn fan_out(
        &self,
        goal: &GoalDef,
        task: &str,
        agents: &[AgentDef],
        goal_seq: u64,
    ) -> Result<GoalOutcome> {
        let child_cancel = self.cancel.child_token();
        let mut handles = Vec::new();

        for agent in agents {
            let env = self.env.clone();
            let cfg = LoopConfig {
                goal_name: goal.name.clone(),
                agent_name: agent.name.clone(),
                agent_role: "subagent".to_string(),
                persona: persona_of(agent, &self.state)?,
                allowed_tools: allowed_tools_of(agent),
                profile: agent.profile.clone(),
                task: task.to_string(),
                expected_outputs: agent.outputs.clone(),
            };
            let cancel = child_cancel.clone();
            let agent_name = agent.name.clone();

            handles.push(tokio::spawn(async move {
                env.log.append(
                    Event::of(EventKind::SubagentStart)
                        .goal(&cfg.goal_name)
                        .agent(&agent_name)
                        .agent_role("subagent")
                        .parent(goal_seq),
                )?;
                let result = run_agent_loop(env.clone(), cfg.clone(), cancel).await;
                match &result {
                    Ok(outcome) => {
                        env.log.append(
                            Event::of(EventKind::SubagentEnd)
                                .goal(&cfg.goal_name)
                                .agent(&agent_name)
                                .agent_role("subagent")
                                .parent(goal_seq)
                                .success(true)
                                .content(truncate_marked(&outcome.text, 2000)),
                        )?;
                    }
                    Err(e) => {
                        env.log.append(
                            Event::of(EventKind::SubagentEnd)
                                .goal(&cfg.goal_name)
                                .agent(&agent_name)
                                .agent_role("subagent")
                                .parent(goal_seq)
                                .success(false)
                                .error_text(e.to_string()),
                        )?;
                    }
                }
                result.map(|outcome| (agent_name, outcome))
            }));
        }

        // Join in declaration order so the synthesis prompt is deterministic.
        let mut outputs: Vec<(String, GoalOutcome)> = Vec::new();
        let mut first_error: Option<Error> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(pair)) => outputs.push(pair),
                Ok(Err(e)) => {
                    child_cancel.cancel();
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    child_cancel.cancel();
                    first_error.get_or_insert(Error::Internal(format!(
                        "sub-agent task panicked: {}",
                        join_err
                    )));
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut synthesis_task = format!(
            "{}\n\nYou are synthesizing the work of {} sub-agents on this goal. \
             Their outputs follow verbatim.\n",
            task,
            outputs.len()
        );
        for (name, outcome) in &outputs {
            synthesis_task.push_str(&format!("\n## {}\n{}\n", name, outcome.text));
        }

        run_agent_loop(
            self.env.clone(),
            LoopConfig {
                goal_name: goal.name.clone(),
                agent_name: String::new(),
                agent_role: "synthesis".to_string(),
                persona: None,
                allowed_tools: None,
                profile: None,
                task: synthesis_task,
                expected_outputs: goal.outputs.clone(),
            },
            self.cancel.clone(),
        )
        .await
    }
}

fn persona_of(agent: &AgentDef, state: &RunState) -> Result<Option<String>> {
    if agent.prompt.is_empty() {
        return Ok(None);
    }
    Ok(Some(interpolate(&agent.prompt, &state.vars())?))
}

fn allowed_tools_of(agent: &AgentDef) -> Option<Vec<String>> {
    if agent.is_skill && !agent.allowed_tools.is_empty() {
        Some(agent.allowed_tools.clone())
    } else {
        None
    }
}
