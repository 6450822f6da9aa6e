//! grep tool — content search with regex support

use crate::registry::{Tool, ToolResult};
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const RESULT_CAP: usize = 5000;

pub struct GrepTool {
    workspace_root: PathBuf,
}

impl GrepTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents using regex patterns. Returns matching file paths by default, \
         or matching lines with context. Use glob parameter to filter files."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: workspace root)"
                },
                "glob": {
                    "type": "string",
                    "description": "Glob pattern to filter files (e.g. '*.rs')"
                },
                "output_mode": {
                    "type": "string",
                    "enum": ["files_with_matches", "content", "count"],
                    "description": "Output mode (default: files_with_matches)"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case insensitive search (default: false)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let pattern = match args["pattern"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: pattern"),
        };

        let regex_pattern = if args["case_insensitive"].as_bool().unwrap_or(false) {
            format!("(?i){}", pattern)
        } else {
            pattern.to_string()
        };
        let regex = match Regex::new(&regex_pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Invalid regex: {}", e)),
        };

        let search_root = args["path"]
            .as_str()
            .map(|p| super::resolve_path(&self.workspace_root, p))
            .unwrap_or_else(|| self.workspace_root.clone());
        let output_mode = args["output_mode"].as_str().unwrap_or("files_with_matches");

        let file_glob = args["glob"].as_str().and_then(|g| {
            globset::GlobBuilder::new(g)
                .literal_separator(false)
                .build()
                .ok()
                .map(|g| g.compile_matcher())
        });

        if search_root.is_file() {
            return search_file(&search_root, &regex, output_mode);
        }

        let mut results = Vec::new();
        for entry in WalkDir::new(&search_root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !super::skip_dir(&e.file_name().to_string_lossy()))
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(ref glob) = file_glob {
                if !glob.is_match(entry.file_name().to_string_lossy().as_ref()) {
                    continue;
                }
            }
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            // Binary sniff: NUL in the first 512 bytes.
            if bytes.iter().take(512).any(|b| *b == 0) {
                continue;
            }
            let content = String::from_utf8_lossy(&bytes);
            if !regex.is_match(&content) {
                continue;
            }

            match output_mode {
                "count" => {
                    results.push(format!(
                        "{}:{}",
                        entry.path().display(),
                        regex.find_iter(&content).count()
                    ));
                }
                "content" => {
                    for (i, line) in content.lines().enumerate() {
                        if regex.is_match(line) {
                            results.push(format!("{}:{}:{}", entry.path().display(), i + 1, line));
                        }
                    }
                }
                _ => results.push(entry.path().to_string_lossy().to_string()),
            }

            if results.len() > RESULT_CAP {
                break;
            }
        }

        debug!("grep: '{}' → {} results", pattern, results.len());
        if results.is_empty() {
            ToolResult::text("No matches found")
        } else {
            ToolResult::text(results.join("\n"))
        }
    }
}

fn search_file(path: &Path, regex: &Regex, output_mode: &str) -> ToolResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to read: {}", e)),
    };
    if !regex.is_match(&content) {
        return ToolResult::text("No matches found");
    }
    match output_mode {
        "files_with_matches" => ToolResult::text(path.to_string_lossy().to_string()),
        "count" => ToolResult::text(regex.find_iter(&content).count().to_string()),
        _ => {
            let mut results = Vec::new();
            for (i, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    results.push(format!("{}:{}", i + 1, line));
                }
            }
            ToolResult::text(results.join("\n"))
        }
    }
}
