//! Builtin tool implementations

pub mod bash;
pub mod edit;
pub mod fs_read;
pub mod fs_write;
pub mod glob;
pub mod grep;
pub mod ls;
pub mod memory;
pub mod web;

use std::path::{Path, PathBuf};

/// Resolve a user-supplied path against the workspace root. `~` expands to
/// the home directory; absolute paths pass through; relative paths join the
/// workspace. Symlinks are resolved when the target exists.
pub(crate) fn resolve_path(workspace_root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir().unwrap_or_default().join(rest)
    } else if p.is_absolute() {
        p.to_path_buf()
    } else {
        workspace_root.join(p)
    };
    expanded.canonicalize().unwrap_or(expanded)
}

/// Directory names that file walks never descend into.
pub(crate) fn skip_dir(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules" || name == "target"
}
