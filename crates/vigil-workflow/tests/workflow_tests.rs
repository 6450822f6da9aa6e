//! End-to-end tests for the workflow language: parse + load + validate

use vigil_workflow::*;

// ===========================================================================
// Core language shapes
// ===========================================================================

#[test]
fn parser_basics() {
    let wf = load_workflow_str(
        "NAME t\nINPUT topic DEFAULT \"go\"\nGOAL a \"Analyze $topic\"\nRUN main USING a\n",
    )
    .unwrap();
    assert_eq!(wf.name, "t");
    assert_eq!(wf.inputs.len(), 1);
    assert_eq!(wf.inputs[0].name, "topic");
    assert_eq!(wf.inputs[0].default.as_deref(), Some("go"));
    assert_eq!(wf.goals.len(), 1);
    assert_eq!(wf.goals[0].name, "a");
    assert_eq!(wf.goals[0].outcome, "Analyze $topic");
    assert_eq!(wf.steps.len(), 1);
    assert_eq!(wf.steps[0].kind, StepKind::Run);
    assert_eq!(wf.steps[0].name, "main");
    assert_eq!(wf.steps[0].goals, vec!["a"]);
}

#[test]
fn undefined_goal_fails_validation() {
    let err = load_workflow_str("NAME t\nRUN m USING x\n").unwrap_err().to_string();
    assert!(err.contains("x"));
    assert!(err.contains("line 2"));
}

#[test]
fn loop_variable_stays_unresolved_until_runtime() {
    let wf = load_workflow_str(
        "NAME t\nINPUT max DEFAULT 10\nGOAL g \"work\"\nLOOP s USING g WITHIN $max\n",
    )
    .unwrap();
    let step = &wf.steps[0];
    assert_eq!(step.kind, StepKind::Loop);
    assert_eq!(step.name, "s");
    assert_eq!(step.within_var.as_deref(), Some("max"));
    assert_eq!(step.within_limit, None);
}

// ===========================================================================
// File loading
// ===========================================================================

#[test]
fn load_workflow_resolves_from_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("persona.md"), "You review Rust code.\n").unwrap();
    std::fs::write(
        dir.path().join("flow.vgl"),
        "NAME review\nAGENT critic FROM persona.md\nGOAL check \"Review the diff\" USING critic\nRUN main USING check\n",
    )
    .unwrap();

    let wf = load_workflow(&dir.path().join("flow.vgl"), &[]).unwrap();
    assert_eq!(wf.agents[0].prompt, "You review Rust code.\n");
}

#[test]
fn load_workflow_rejects_bad_from() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("flow.vgl"),
        "NAME t\nAGENT a FROM missing.md\nGOAL g \"x\"\nRUN m USING g\n",
    )
    .unwrap();
    assert!(load_workflow(&dir.path().join("flow.vgl"), &[]).is_err());
}

// ===========================================================================
// Larger workflows
// ===========================================================================

#[test]
fn multi_agent_fanout_with_outputs() {
    let wf = load_workflow_str(
        "NAME research\n\
         INPUT topic DEFAULT \"rust async\"\n\
         AGENT optimist \"Argue for $topic\"\n\
         AGENT skeptic \"Argue against $topic\"\n\
         GOAL debate \"Evaluate $topic\" -> verdict, summary USING optimist, skeptic\n\
         GOAL write \"Write up $verdict with $summary\"\n\
         RUN main USING debate, write\n",
    )
    .unwrap();
    assert_eq!(wf.goals[0].using, vec!["optimist", "skeptic"]);
    assert_eq!(wf.goals[0].outputs, vec!["verdict", "summary"]);
    // `write` can see the outputs of `debate` because it is declared later.
    assert_eq!(wf.goals[1].name, "write");
}

#[test]
fn steps_run_in_file_order() {
    let wf = load_workflow_str(
        "NAME t\nGOAL a \"x\"\nGOAL b \"y\"\nRUN first USING a\nLOOP second USING b WITHIN 2\n",
    )
    .unwrap();
    assert_eq!(wf.steps[0].name, "first");
    assert_eq!(wf.steps[1].name, "second");
    assert_eq!(wf.steps[1].within_limit, Some(2));
}
