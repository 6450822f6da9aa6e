//! vigil workflow language — parse, load, validate.
//!
//! `load_workflow` is the one-call entry: parse the file, resolve FROM
//! targets relative to it, validate, and hand back a read-only AST.

pub mod ast;
pub mod loader;
pub mod parser;
pub mod validate;
pub mod vars;

pub use ast::{AgentDef, GoalDef, Input, Step, StepKind, Workflow};
pub use parser::parse_workflow;
pub use validate::validate;
pub use vars::{interpolate, referenced_vars};

use std::path::{Path, PathBuf};
use vigil_core::Result;

/// Parse, resolve, and validate a workflow file.
pub fn load_workflow(path: &Path, skill_paths: &[PathBuf]) -> Result<Workflow> {
    let source = std::fs::read_to_string(path)?;
    let mut wf = parser::parse_workflow(&source)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    loader::resolve_from_targets(&mut wf, base_dir, skill_paths)?;
    validate::validate(&wf)?;
    Ok(wf)
}

/// Parse and validate inline source (no FROM resolution). Used by tests and
/// callers that assemble workflows programmatically.
pub fn load_workflow_str(source: &str) -> Result<Workflow> {
    let wf = parser::parse_workflow(source)?;
    validate::validate(&wf)?;
    Ok(wf)
}
