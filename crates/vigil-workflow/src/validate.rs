//! Post-load validation — declaration order, reference resolution, `$var`
//! reachability.

use crate::ast::{StepKind, Workflow};
use crate::vars::referenced_vars;
use std::collections::HashSet;
use vigil_core::{Error, Result};

/// Validate a fully loaded workflow. Errors carry the offending line.
pub fn validate(wf: &Workflow) -> Result<()> {
    if wf.name.is_empty() {
        return Err(Error::parse(1, "workflow has no NAME statement"));
    }

    check_unique(wf)?;

    // Every goal's USING names a declared agent.
    for goal in &wf.goals {
        for agent in &goal.using {
            if wf.agent(agent).is_none() {
                return Err(Error::parse(
                    goal.line,
                    format!("goal '{}' uses undeclared agent '{}'", goal.name, agent),
                ));
            }
        }
    }

    // Steps reference goals declared earlier in file order.
    if wf.steps.is_empty() {
        return Err(Error::parse(1, "workflow has no RUN or LOOP step"));
    }
    for step in &wf.steps {
        for goal_name in &step.goals {
            match wf.goal(goal_name) {
                None => {
                    return Err(Error::parse(
                        step.line,
                        format!("step '{}' runs undeclared goal '{}'", step.name, goal_name),
                    ));
                }
                Some(goal) if goal.line >= step.line => {
                    return Err(Error::parse(
                        step.line,
                        format!(
                            "step '{}' runs goal '{}' declared later (line {})",
                            step.name, goal_name, goal.line
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        // LOOP's variable must refer to an INPUT.
        if step.kind == StepKind::Loop {
            if let Some(var) = &step.within_var {
                if wf.input(var).is_none() {
                    return Err(Error::parse(
                        step.line,
                        format!("WITHIN ${} does not refer to a declared INPUT", var),
                    ));
                }
            }
        }
    }

    check_var_references(wf)?;
    Ok(())
}

fn check_unique(wf: &Workflow) -> Result<()> {
    let mut seen = HashSet::new();
    for input in &wf.inputs {
        if !seen.insert(&input.name) {
            return Err(Error::parse(
                input.line,
                format!("duplicate INPUT '{}'", input.name),
            ));
        }
    }
    seen.clear();
    for agent in &wf.agents {
        if !seen.insert(&agent.name) {
            return Err(Error::parse(
                agent.line,
                format!("duplicate AGENT '{}'", agent.name),
            ));
        }
    }
    seen.clear();
    for goal in &wf.goals {
        if !seen.insert(&goal.name) {
            return Err(Error::parse(
                goal.line,
                format!("duplicate GOAL '{}'", goal.name),
            ));
        }
    }
    seen.clear();
    for step in &wf.steps {
        if !seen.insert(&step.name) {
            return Err(Error::parse(
                step.line,
                format!("duplicate step '{}'", step.name),
            ));
        }
    }
    Ok(())
}

/// `$name` in a prompt must resolve to an input or a structured output of a
/// goal or agent declared earlier in the file.
fn check_var_references(wf: &Workflow) -> Result<()> {
    let mut known: HashSet<String> = wf.inputs.iter().map(|i| i.name.clone()).collect();

    // Walk declarations in file order, goals and agents interleaved.
    let mut decls: Vec<(usize, &str, &str, &[String])> = Vec::new();
    for agent in &wf.agents {
        decls.push((agent.line, "agent", &agent.prompt, &agent.outputs));
    }
    for goal in &wf.goals {
        decls.push((goal.line, "goal", &goal.outcome, &goal.outputs));
    }
    decls.sort_by_key(|(line, ..)| *line);

    for (line, kind, text, outputs) in decls {
        for var in referenced_vars(text) {
            if !known.contains(&var) {
                return Err(Error::parse(
                    line,
                    format!("{} references unknown variable '${}'", kind, var),
                ));
            }
        }
        for output in outputs {
            known.insert(output.clone());
        }
    }
    Ok(())
}
