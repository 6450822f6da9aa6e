//! Shared execution environment handed to every agent loop.

use std::collections::HashMap;
use std::sync::Arc;
use vigil_core::SessionLog;
use vigil_llm::ResolvedModel;
use vigil_security::SecurityPipeline;
use vigil_tools::{Policy, ToolRegistry};

/// Everything an agent loop needs, shared across parallel sub-agents.
/// Cheap to clone behind `Arc`.
pub struct ExecEnv {
    pub log: Arc<SessionLog>,
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<Policy>,
    pub security: Arc<SecurityPipeline>,
    /// Model for goals without a capability profile.
    pub primary: ResolvedModel,
    /// Model for the execution supervisor (SUPERVISE phase).
    pub supervisor: ResolvedModel,
    /// Resolved capability profiles, keyed by `REQUIRES` name.
    pub profiles: HashMap<String, ResolvedModel>,
    /// Tool-call budget per EXECUTE phase.
    pub max_tool_calls: usize,
    /// REORIENT budget per goal before the loop gives up.
    pub max_reorients: usize,
}

impl ExecEnv {
    /// The model an agent persona runs with: its profile if tagged,
    /// otherwise the primary model.
    pub fn model_for(&self, profile: Option<&str>) -> &ResolvedModel {
        profile
            .and_then(|name| self.profiles.get(name))
            .unwrap_or(&self.primary)
    }
}

pub const DEFAULT_MAX_TOOL_CALLS: usize = 25;
pub const DEFAULT_MAX_REORIENTS: usize = 3;
