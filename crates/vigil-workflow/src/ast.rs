//! Workflow AST — the read-only product of parse + load + validate.

use std::path::PathBuf;

#[derive(Clone, Debug, Default)]
pub struct Workflow {
    pub name: String,
    pub inputs: Vec<Input>,
    pub agents: Vec<AgentDef>,
    pub goals: Vec<GoalDef>,
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentDef> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn goal(&self, name: &str) -> Option<&GoalDef> {
        self.goals.iter().find(|g| g.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct Input {
    pub name: String,
    pub default: Option<String>,
    pub line: usize,
}

/// A persona declared with AGENT. `prompt` is the inline string or the body
/// loaded from the FROM target.
#[derive(Clone, Debug, Default)]
pub struct AgentDef {
    pub name: String,
    pub prompt: String,
    /// Raw FROM value, before resolution.
    pub from: Option<String>,
    /// Capability profile from `REQUIRES "<name>"`.
    pub profile: Option<String>,
    /// Structured output field names from `-> a, b`.
    pub outputs: Vec<String>,
    /// True when the FROM target was a skill directory.
    pub is_skill: bool,
    pub skill_dir: Option<PathBuf>,
    /// From the skill's `allowed-tools` frontmatter, empty = unrestricted.
    pub allowed_tools: Vec<String>,
    pub line: usize,
}

#[derive(Clone, Debug, Default)]
pub struct GoalDef {
    pub name: String,
    /// Inline outcome string or loaded prompt body.
    pub outcome: String,
    pub from: Option<String>,
    /// Agent names from `USING a, b`.
    pub using: Vec<String>,
    pub outputs: Vec<String>,
    pub line: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Run,
    Loop,
}

#[derive(Clone, Debug)]
pub struct Step {
    pub kind: StepKind,
    pub name: String,
    /// Goal names, run in order.
    pub goals: Vec<String>,
    /// Literal iteration cap from `WITHIN n`.
    pub within_limit: Option<u64>,
    /// Input reference from `WITHIN $name`.
    pub within_var: Option<String>,
    pub line: usize,
}
