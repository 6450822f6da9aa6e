//! vigil tools — typed operations behind a uniform dispatch
//!
//! Each tool is a self-contained file in src/tools/. The policy engine lives
//! here too: dispatch consults it before any tool runs.

pub mod policy;
pub mod registry;
pub mod tools;

pub use policy::{BashVerdict, Policy, Sandbox, Verdict};
pub use registry::{Tool, ToolRegistry, ToolResult};
pub use tools::memory::MemoryStore;

use std::path::{Path, PathBuf};

/// Create the default tool registry with all builtin tools.
///
/// Sandbox mode and web rate limits are taken from the policy; the memory
/// store persists to `memory_file` when given.
pub fn create_default_registry(
    workspace_root: impl AsRef<Path>,
    policy: &Policy,
    memory_file: Option<PathBuf>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let root = workspace_root.as_ref();

    // --- Read-only filesystem tools ---
    registry.register(tools::fs_read::ReadTool::new(root));
    registry.register(tools::glob::GlobTool::new(root));
    registry.register(tools::grep::GrepTool::new(root));
    registry.register(tools::ls::LsTool::new(root));

    // --- Mutation tools ---
    registry.register(tools::fs_write::WriteTool::new(root));
    registry.register(tools::edit::EditTool::new(root));
    registry.register(tools::bash::BashTool::new(root).with_sandbox(policy.bash_sandbox()));

    // --- Network tools (rate limits from policy) ---
    let fetch_limit = policy.rule("web_fetch").and_then(|r| r.rate_limit);
    let search_limit = policy.rule("web_search").and_then(|r| r.rate_limit);
    registry.register(tools::web::WebFetchTool::new(fetch_limit));
    registry.register(tools::web::WebSearchTool::new(search_limit));

    // --- Memory ---
    let store = tools::memory::MemoryStore::new(memory_file);
    registry.register(tools::memory::MemoryReadTool::new(store.clone()));
    registry.register(tools::memory::MemoryWriteTool::new(store));

    registry
}
