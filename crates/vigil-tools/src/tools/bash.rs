//! bash tool — shell commands with timeout, optional containment, and
//! cancellation

use crate::policy::Sandbox;
use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vigil_core::clamp_utf8;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 600;
const OUTPUT_CAP: usize = 30_000;

pub struct BashTool {
    workspace_root: PathBuf,
    sandbox: Sandbox,
}

impl BashTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
            sandbox: Sandbox::None,
        }
    }

    pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Build the process for `command` under the configured containment.
    fn command(&self, command: &str) -> Command {
        let ws = self.workspace_root.display().to_string();
        match self.sandbox {
            Sandbox::None => {
                let mut c = Command::new("bash");
                c.arg("-c").arg(command).current_dir(&self.workspace_root);
                c
            }
            Sandbox::Bwrap => {
                let mut c = Command::new("bwrap");
                c.args(["--ro-bind", "/", "/"])
                    .args(["--bind", &ws, &ws])
                    .args(["--dev", "/dev"])
                    .args(["--proc", "/proc"])
                    .args(["--chdir", &ws])
                    .args(["--unshare-net"])
                    .args(["bash", "-c", command]);
                c
            }
            Sandbox::Docker => {
                let mut c = Command::new("docker");
                c.args(["run", "--rm", "--network", "none"])
                    .args(["-v", &format!("{}:{}", ws, ws)])
                    .args(["-w", &ws])
                    .args(["debian:stable-slim", "bash", "-c", command]);
                c
            }
        }
    }
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command. Captures stdout and stderr. \
         Set timeout in seconds (default 30, max 600)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 30, max 600)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        self.execute_cancellable(args, CancellationToken::new()).await
    }

    /// Spawns with kill_on_drop and races completion against the timeout and
    /// the cancellation token; the child is killed on either.
    async fn execute_cancellable(&self, args: Value, cancel: CancellationToken) -> ToolResult {
        let command = match args["command"].as_str() {
            Some(c) => c,
            None => return ToolResult::error("Missing required parameter: command"),
        };
        let timeout_secs = args["timeout"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        debug!("bash: {}", clamp_utf8(command, 80));

        let mut child = match self
            .command(command)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("Failed to spawn: {}", e)),
        };

        let timeout = std::time::Duration::from_secs(timeout_secs);
        tokio::select! {
            result = tokio::time::timeout(timeout, child.wait()) => {
                match result {
                    Ok(Ok(status)) => {
                        let stdout = read_pipe(child.stdout.take()).await;
                        let stderr = read_pipe(child.stderr.take()).await;
                        format_output(status, &stdout, &stderr)
                    }
                    Ok(Err(e)) => ToolResult::error(format!("Failed to wait: {}", e)),
                    Err(_) => {
                        let _ = child.kill().await;
                        ToolResult::error(format!("Command timed out after {}s", timeout_secs))
                    }
                }
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                ToolResult::error("canceled")
            }
        }
    }
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    use tokio::io::AsyncReadExt;
    match pipe {
        Some(mut p) => {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        }
        None => String::new(),
    }
}

fn format_output(status: std::process::ExitStatus, stdout: &str, stderr: &str) -> ToolResult {
    let result = if status.success() {
        if stderr.is_empty() {
            stdout.trim().to_string()
        } else {
            format!("{}\n{}", stdout.trim(), stderr.trim())
        }
    } else {
        format!(
            "Exit code: {}\n{}\n{}",
            status.code().unwrap_or(-1),
            stdout.trim(),
            stderr.trim()
        )
    };

    if result.is_empty() {
        ToolResult::text("(no output)")
    } else if result.len() > OUTPUT_CAP {
        ToolResult::text(format!(
            "{}\n... [truncated, {} total chars]",
            clamp_utf8(&result, OUTPUT_CAP),
            result.len()
        ))
    } else {
        ToolResult::text(result)
    }
}
