//! Session events — the forensic record every component appends to.
//!
//! Events are immutable once appended. `seq` is assigned by the session log,
//! never by the producer. `correlation_id` ties a tool call to its security
//! checks and its result; `parent_seq` nests sub-agent activity under the
//! event that spawned it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of event kinds. Rendering and emission sites match on this
/// exhaustively; adding a kind is a breaking change to the log format.
///
/// The `security_tier1/2/3` aliases deserialize logs written before the tiers
/// were renamed. They are never emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStart,
    WorkflowEnd,
    GoalStart,
    GoalEnd,
    User,
    Assistant,
    System,
    ToolCall,
    ToolResult,
    PhaseCommit,
    PhaseExecute,
    PhaseReconcile,
    PhaseSupervise,
    SecurityBlock,
    #[serde(alias = "security_tier1")]
    SecurityStatic,
    #[serde(alias = "security_tier2")]
    SecurityTriage,
    #[serde(alias = "security_tier3")]
    SecuritySupervisor,
    SecurityDecision,
    BashSecurity,
    Checkpoint,
    SubagentStart,
    SubagentEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::WorkflowEnd => "workflow_end",
            Self::GoalStart => "goal_start",
            Self::GoalEnd => "goal_end",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::PhaseCommit => "phase_commit",
            Self::PhaseExecute => "phase_execute",
            Self::PhaseReconcile => "phase_reconcile",
            Self::PhaseSupervise => "phase_supervise",
            Self::SecurityBlock => "security_block",
            Self::SecurityStatic => "security_static",
            Self::SecurityTriage => "security_triage",
            Self::SecuritySupervisor => "security_supervisor",
            Self::SecurityDecision => "security_decision",
            Self::BashSecurity => "bash_security",
            Self::Checkpoint => "checkpoint",
            Self::SubagentStart => "subagent_start",
            Self::SubagentEnd => "subagent_end",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// One record in the session log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: u64,
    #[serde(default = "epoch")]
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub goal: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub step: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub parent_seq: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Event {
    pub fn of(kind: EventKind) -> Self {
        Self {
            seq: 0,
            ts: epoch(),
            kind,
            goal: String::new(),
            step: String::new(),
            agent: String::new(),
            agent_role: String::new(),
            correlation_id: String::new(),
            parent_seq: 0,
            content: String::new(),
            tool_name: String::new(),
            args: Value::Null,
            success: None,
            error: String::new(),
            duration_ms: 0,
            meta: Value::Null,
        }
    }

    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = step.into();
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = role.into();
        self
    }

    pub fn correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn parent(mut self, seq: u64) -> Self {
        self.parent_seq = seq;
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn tool(mut self, name: impl Into<String>, args: Value) -> Self {
        self.tool_name = name.into();
        self.args = args;
        self
    }

    pub fn success(mut self, ok: bool) -> Self {
        self.success = Some(ok);
        self
    }

    pub fn error_text(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// Attach a typed meta payload. Serialization failure degrades to null
    /// rather than dropping the event.
    pub fn meta<T: Serialize>(mut self, meta: &T) -> Self {
        self.meta = serde_json::to_value(meta).unwrap_or(Value::Null);
        self
    }
}

// ---------------------------------------------------------------------------
// Typed meta payloads, one per event kind that carries structure.
// ---------------------------------------------------------------------------

/// `phase_commit` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommitMeta {
    pub commitment: String,
    pub confidence: String,
    #[serde(default)]
    pub expected_tools: Vec<String>,
}

/// `phase_execute` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecuteMeta {
    pub iterations: usize,
    pub tool_calls: usize,
    pub result: String,
}

/// `phase_reconcile` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReconcileMeta {
    pub triggers: Vec<String>,
    pub escalate: bool,
}

/// `phase_supervise` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SuperviseMeta {
    pub verdict: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correction: String,
    pub supervisor_type: String,
}

/// `security_static` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticCheckMeta {
    pub pass: bool,
    #[serde(default)]
    pub flags: Vec<String>,
    pub entropy: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub skip_reason: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub taint_lineage: Value,
}

/// `security_triage` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriageMeta {
    pub suspicious: bool,
    pub rationale: String,
}

/// `security_supervisor` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecuritySupervisorMeta {
    pub action: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub taint_lineage: Value,
}

/// `security_decision` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DecisionMeta {
    pub action: String,
    pub check_path: String,
    pub reason: String,
}

/// `bash_security` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BashCheckMeta {
    /// "[deterministic]" or "[llm]".
    pub check: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// `assistant` payload: model + token accounting for replay cost math.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsageMeta {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_snake_case() {
        let json = serde_json::to_string(&EventKind::SecurityStatic).unwrap();
        assert_eq!(json, "\"security_static\"");
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventKind::SecurityStatic);
    }

    #[test]
    fn legacy_tier_names_deserialize_as_aliases() {
        let k: EventKind = serde_json::from_str("\"security_tier1\"").unwrap();
        assert_eq!(k, EventKind::SecurityStatic);
        let k: EventKind = serde_json::from_str("\"security_tier2\"").unwrap();
        assert_eq!(k, EventKind::SecurityTriage);
        let k: EventKind = serde_json::from_str("\"security_tier3\"").unwrap();
        assert_eq!(k, EventKind::SecuritySupervisor);
        // Aliases are read-only: serialization always uses the new names.
        assert_eq!(
            serde_json::to_string(&EventKind::SecuritySupervisor).unwrap(),
            "\"security_supervisor\""
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let e = Event::of(EventKind::Checkpoint);
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("goal"));
        assert!(!json.contains("tool_name"));
        assert!(!json.contains("parent_seq"));
        assert!(json.contains("\"type\":\"checkpoint\""));
    }

    #[test]
    fn builder_sets_fields() {
        let e = Event::of(EventKind::ToolCall)
            .goal("g")
            .tool("read", serde_json::json!({"file_path": "/tmp/x"}))
            .correlation("a1b2c3d4");
        assert_eq!(e.goal, "g");
        assert_eq!(e.tool_name, "read");
        assert_eq!(e.correlation_id, "a1b2c3d4");
    }

    #[test]
    fn meta_round_trip() {
        let e = Event::of(EventKind::PhaseReconcile).meta(&ReconcileMeta {
            triggers: vec!["tool_failure".into()],
            escalate: true,
        });
        let m: ReconcileMeta = serde_json::from_value(e.meta.clone()).unwrap();
        assert!(m.escalate);
        assert_eq!(m.triggers, vec!["tool_failure"]);
    }
}
