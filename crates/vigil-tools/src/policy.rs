//! Policy engine — per-tool allow/deny rules with glob matching.
//!
//! Loaded once from a TOML document, read-only afterwards. `check` is
//! deterministic and side-effect-free; rate limiting is enforced inside the
//! web tools using the numbers recorded here.
//!
//! Glob semantics: a single `*` matches one path segment, `**` matches any
//! depth. Deny patterns are checked before allow patterns. A tool with no
//! allow list is denied when `default_deny` is set.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use vigil_core::{Error, Result};

/// Names of the built-in tools a policy document may configure.
pub const POLICY_TOOLS: &[&str] = &[
    "read",
    "write",
    "edit",
    "glob",
    "grep",
    "ls",
    "bash",
    "web_fetch",
    "web_search",
    "memory_read",
    "memory_write",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sandbox {
    #[default]
    None,
    Bwrap,
    Docker,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolRule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,

    // bash only
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub allowed_dirs: Vec<String>,
    pub sandbox: Sandbox,

    // web tools only
    pub allow_domains: Vec<String>,
    /// Requests per minute.
    pub rate_limit: Option<u32>,
}

impl Default for ToolRule {
    fn default() -> Self {
        Self {
            enabled: true,
            allow: None,
            deny: None,
            allowlist: Vec::new(),
            denylist: Vec::new(),
            allowed_dirs: Vec::new(),
            sandbox: Sandbox::None,
            allow_domains: Vec::new(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PolicyFile {
    default_deny: bool,
    workspace: Option<String>,
    #[serde(flatten)]
    tools: HashMap<String, ToolRule>,
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { reason: String },
}

impl Verdict {
    fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Outcome of the deterministic bash command check. `Ambiguous` means the
/// pattern lists were silent and dispatch may escalate to the LLM check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BashVerdict {
    Allow,
    Deny { reason: String },
    Ambiguous,
}

#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub default_deny: bool,
    workspace: String,
    rules: HashMap<String, ToolRule>,
}

impl Policy {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: PolicyFile =
            toml::from_str(content).map_err(|e| Error::config(format!("policy: {}", e)))?;
        for name in file.tools.keys() {
            if !POLICY_TOOLS.contains(&name.as_str()) {
                return Err(Error::config(format!("policy: unknown tool table [{}]", name)));
            }
        }
        Ok(Self {
            default_deny: file.default_deny,
            workspace: file.workspace.unwrap_or_default(),
            rules: file.tools,
        })
    }

    /// A permissive policy for tests and unpoliced runs.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Override the `$WORKSPACE` expansion target at run start.
    pub fn set_workspace(&mut self, workspace: impl Into<String>) {
        self.workspace = workspace.into();
    }

    pub fn rule(&self, tool: &str) -> Option<&ToolRule> {
        self.rules.get(tool)
    }

    /// Sandbox mode configured for bash.
    pub fn bash_sandbox(&self) -> Sandbox {
        self.rules.get("bash").map(|r| r.sandbox).unwrap_or_default()
    }

    /// Expand `$WORKSPACE` and `~` in a pattern or path.
    fn expand(&self, pattern: &str) -> String {
        let mut out = pattern.replace("$WORKSPACE", &self.workspace);
        if out == "~" || out.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                out = format!("{}{}", home.display(), &out[1..]);
            }
        }
        out
    }

    /// Deterministic allow/deny for one tool invocation.
    pub fn check(&self, tool: &str, args: &Value) -> Verdict {
        let rule = match self.rules.get(tool) {
            Some(r) => r,
            None => {
                return if self.default_deny {
                    Verdict::deny(format!("no policy entry for '{}' and default_deny is set", tool))
                } else {
                    Verdict::Allow
                };
            }
        };

        if !rule.enabled {
            return Verdict::deny(format!("tool '{}' is disabled by policy", tool));
        }

        match tool {
            "bash" => {
                let command = args.get("command").and_then(|v| v.as_str()).unwrap_or("");
                match self.check_bash(command) {
                    BashVerdict::Deny { reason } => Verdict::Deny { reason },
                    // Ambiguous is not a policy denial; the LLM check decides.
                    _ => Verdict::Allow,
                }
            }
            "web_fetch" => {
                let url = args.get("url").and_then(|v| v.as_str()).unwrap_or("");
                self.check_domain(rule, url)
            }
            "web_search" => Verdict::Allow,
            "memory_read" | "memory_write" => {
                let key = args.get("key").and_then(|v| v.as_str()).unwrap_or("");
                self.check_subject(rule, key)
            }
            _ => {
                let path = subject_path(args);
                let resolved = self.resolve_subject_path(&path);
                self.check_subject(rule, &resolved)
            }
        }
    }

    /// Deterministic bash pattern check. Deny list first, then allow list;
    /// a command matching neither is `Deny` under default_deny, otherwise
    /// `Ambiguous` (dispatch escalates to the LLM check).
    pub fn check_bash(&self, command: &str) -> BashVerdict {
        let rule = match self.rules.get("bash") {
            Some(r) => r,
            None => {
                return if self.default_deny {
                    BashVerdict::Deny {
                        reason: "no bash policy and default_deny is set".into(),
                    }
                } else {
                    BashVerdict::Ambiguous
                };
            }
        };

        if !rule.enabled {
            return BashVerdict::Deny {
                reason: "bash is disabled by policy".into(),
            };
        }

        let candidates = bash_candidates(command);

        for pattern in &rule.denylist {
            let pattern = self.expand(pattern);
            for candidate in &candidates {
                if glob_match_permissive(&pattern, candidate) {
                    return BashVerdict::Deny {
                        reason: format!("command matches denylist pattern '{}'", pattern),
                    };
                }
            }
        }

        if let Some(reason) = self.check_allowed_dirs(rule, command) {
            return BashVerdict::Deny { reason };
        }

        if detect_obfuscation(command) {
            return BashVerdict::Deny {
                reason: "command looks like an obfuscation attempt".into(),
            };
        }

        for pattern in &rule.allowlist {
            let pattern = self.expand(pattern);
            for candidate in &candidates {
                if glob_match_permissive(&pattern, candidate) {
                    return BashVerdict::Allow;
                }
            }
        }

        if self.default_deny {
            BashVerdict::Deny {
                reason: "command matches no allowlist pattern".into(),
            }
        } else {
            BashVerdict::Ambiguous
        }
    }

    /// Every absolute path mentioned by the command must fall under one of
    /// `allowed_dirs` (when the list is non-empty).
    fn check_allowed_dirs(&self, rule: &ToolRule, command: &str) -> Option<String> {
        if rule.allowed_dirs.is_empty() {
            return None;
        }
        let dirs: Vec<String> = rule.allowed_dirs.iter().map(|d| self.expand(d)).collect();
        for token in command.split_whitespace() {
            let token = token.trim_matches(|c| c == '"' || c == '\'' || c == ';');
            if !token.starts_with('/') {
                continue;
            }
            if !dirs.iter().any(|d| token == d || token.starts_with(&format!("{}/", d))) {
                return Some(format!("path '{}' is outside allowed_dirs", token));
            }
        }
        None
    }

    fn check_subject(&self, rule: &ToolRule, subject: &str) -> Verdict {
        if let Some(deny) = &rule.deny {
            for pattern in deny {
                if glob_match(&self.expand(pattern), subject) {
                    return Verdict::deny(format!("'{}' matches deny pattern '{}'", subject, pattern));
                }
            }
        }
        match &rule.allow {
            Some(allow) => {
                if allow.iter().any(|p| glob_match(&self.expand(p), subject)) {
                    Verdict::Allow
                } else {
                    Verdict::deny(format!("'{}' matches no allow pattern", subject))
                }
            }
            None => {
                if self.default_deny {
                    Verdict::deny("no allow list and default_deny is set")
                } else {
                    Verdict::Allow
                }
            }
        }
    }

    fn check_domain(&self, rule: &ToolRule, url: &str) -> Verdict {
        if rule.allow_domains.is_empty() {
            return if self.default_deny {
                Verdict::deny("no allow_domains and default_deny is set")
            } else {
                Verdict::Allow
            };
        }
        let host = url_host(url);
        if rule
            .allow_domains
            .iter()
            .any(|p| glob_match(p, &host) || p == &host)
        {
            Verdict::Allow
        } else {
            Verdict::deny(format!("domain '{}' is not in allow_domains", host))
        }
    }

    fn resolve_subject_path(&self, path: &str) -> String {
        let expanded = self.expand(path);
        if expanded.starts_with('/') {
            expanded
        } else if self.workspace.is_empty() {
            expanded
        } else {
            format!("{}/{}", self.workspace.trim_end_matches('/'), expanded)
        }
    }
}

fn subject_path(args: &Value) -> String {
    args.get("file_path")
        .or_else(|| args.get("path"))
        .and_then(|v| v.as_str())
        .unwrap_or(".")
        .to_string()
}

/// Host portion of a URL, without scheme, port, or path.
fn url_host(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    rest.split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .split('@')
        .next_back()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Path glob: `*` matches one segment, `**` matches any depth.
fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let mut regex_str = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    regex_str.push_str(".*");
                    i += 2;
                    continue;
                }
                regex_str.push_str("[^/]*");
            }
            '?' => regex_str.push_str("[^/]"),
            '.' | '^' | '$' | '+' | '{' | '}' | '[' | ']' | '|' | '(' | ')' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
            }
            c => regex_str.push(c),
        }
        i += 1;
    }
    regex_str.push('$');
    Regex::new(&regex_str)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Command glob: `*` and `**` both match everything (slashes carry no
/// meaning inside a shell command).
fn glob_match_permissive(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let mut regex_str = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                while i < chars.len() && chars[i] == '*' {
                    i += 1;
                }
                regex_str.push_str(".*");
                continue;
            }
            '?' => regex_str.push('.'),
            '.' | '^' | '$' | '+' | '{' | '}' | '[' | ']' | '|' | '(' | ')' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
            }
            c => regex_str.push(c),
        }
        i += 1;
    }
    regex_str.push('$');
    Regex::new(&regex_str)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Candidate match strings for a bash command: the raw string, `env`-prefix
/// stripped, absolute command paths resolved to basenames, and every
/// `prefix:suffix` split so patterns like `git:*` or `rm -rf:*` match.
fn bash_candidates(command: &str) -> Vec<String> {
    let mut base_commands = vec![command.trim().to_string()];

    let env_stripped = strip_env_prefix(command);
    if env_stripped != command {
        base_commands.push(env_stripped.to_string());
    }

    for cmd in base_commands.clone() {
        let words: Vec<&str> = cmd.split_whitespace().collect();
        if let Some(first) = words.first() {
            if first.contains('/') {
                if let Some(basename) = first.rsplit('/').next() {
                    if !basename.is_empty() {
                        let resolved = std::iter::once(basename)
                            .chain(words[1..].iter().copied())
                            .collect::<Vec<&str>>()
                            .join(" ");
                        if !base_commands.contains(&resolved) {
                            base_commands.push(resolved);
                        }
                    }
                }
            }
        }
    }

    let mut candidates = Vec::new();
    for base in &base_commands {
        candidates.push(base.clone());
        let words: Vec<&str> = base.split_whitespace().collect();
        for i in 1..words.len() {
            candidates.push(format!("{}:{}", words[..i].join(" "), words[i..].join(" ")));
        }
    }
    candidates
}

/// Strip a leading `env` and any inline VAR=VAL assignments.
fn strip_env_prefix(command: &str) -> &str {
    let trimmed = command.trim();
    if !trimmed.starts_with("env ") {
        return command;
    }
    let mut pos = trimmed[4..].trim_start();
    loop {
        let word_end = pos.find(char::is_whitespace).unwrap_or(pos.len());
        let word = &pos[..word_end];
        if word.contains('=') && !word.starts_with('-') {
            pos = pos[word_end..].trim_start();
        } else {
            break;
        }
    }
    pos
}

/// Heuristics for bash commands that try to smuggle a denied action past the
/// pattern lists.
fn detect_obfuscation(command: &str) -> bool {
    let lower = command.to_lowercase();

    if lower.contains("base64")
        && (lower.contains("| bash") || lower.contains("| sh") || lower.contains("| eval"))
    {
        return true;
    }
    if lower.contains("\\x") && lower.contains("printf") {
        return true;
    }
    if lower.contains("ld_preload") || lower.contains("ld_library_path") {
        return true;
    }
    if lower.contains("/proc/self/exe") || lower.contains("/proc/self/fd") {
        return true;
    }
    if Regex::new(r"(?:^|\s|;)(bash|sh|dash)\s+-c\s")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }
    if Regex::new(r"(?:^|\s|;)eval\s")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }
    if Regex::new(r"[A-Za-z_]\w*=\S+\s*;.*\$")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }
    if lower.contains("xargs") && (lower.contains(" sh") || lower.contains(" bash")) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(toml: &str) -> Policy {
        Policy::from_toml(toml).unwrap()
    }

    // ── Glob matching ──

    #[test]
    fn glob_single_star_is_one_segment() {
        assert!(glob_match("/ws/*", "/ws/foo.rs"));
        assert!(!glob_match("/ws/*", "/ws/sub/foo.rs"));
    }

    #[test]
    fn glob_double_star_is_any_depth() {
        assert!(glob_match("/ws/**", "/ws/a/b/c.rs"));
        assert!(glob_match("/ws/**", "/ws/a"));
    }

    #[test]
    fn glob_literal_and_wildcard() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("read", "read"));
        assert!(!glob_match("read", "write"));
    }

    // ── Tool checks ──

    #[test]
    fn deny_is_checked_before_allow() {
        let p = policy(
            r#"
            [read]
            allow = ["/ws/**"]
            deny = ["/ws/secrets/**"]
        "#,
        );
        assert!(p.check("read", &json!({"file_path": "/ws/main.rs"})).is_allow());
        let v = p.check("read", &json!({"file_path": "/ws/secrets/key.pem"}));
        assert!(matches!(v, Verdict::Deny { .. }));
    }

    #[test]
    fn default_deny_without_allow_list() {
        let p = policy("default_deny = true\n[read]\n");
        assert!(!p.check("read", &json!({"file_path": "/anything"})).is_allow());

        let open = policy("[read]\n");
        assert!(open.check("read", &json!({"file_path": "/anything"})).is_allow());
    }

    #[test]
    fn missing_rule_follows_default_deny() {
        let p = policy("default_deny = true\n");
        assert!(!p.check("write", &json!({"file_path": "/x"})).is_allow());
        let open = policy("");
        assert!(open.check("write", &json!({"file_path": "/x"})).is_allow());
    }

    #[test]
    fn disabled_tool_is_denied() {
        let p = policy("[write]\nenabled = false\n");
        let v = p.check("write", &json!({"file_path": "/x"}));
        assert!(matches!(v, Verdict::Deny { .. }));
    }

    #[test]
    fn workspace_variable_expands() {
        let mut p = policy(
            r#"
            [read]
            allow = ["$WORKSPACE/**"]
        "#,
        );
        p.set_workspace("/srv/run");
        assert!(p.check("read", &json!({"file_path": "/srv/run/a.txt"})).is_allow());
        assert!(!p.check("read", &json!({"file_path": "/etc/passwd"})).is_allow());
    }

    #[test]
    fn relative_paths_resolve_against_workspace() {
        let mut p = policy(
            r#"
            [read]
            allow = ["$WORKSPACE/**"]
        "#,
        );
        p.set_workspace("/srv/run");
        assert!(p.check("read", &json!({"file_path": "src/lib.rs"})).is_allow());
    }

    #[test]
    fn unknown_tool_table_is_rejected() {
        assert!(Policy::from_toml("[teleport]\nallow = [\"*\"]\n").is_err());
    }

    // ── Bash ──

    #[test]
    fn bash_denylist_wins() {
        let p = policy(
            r#"
            [bash]
            allowlist = ["*"]
            denylist = ["rm -rf *"]
        "#,
        );
        assert!(matches!(p.check_bash("rm -rf /"), BashVerdict::Deny { .. }));
        assert_eq!(p.check_bash("ls -la"), BashVerdict::Allow);
    }

    #[test]
    fn bash_colon_split_patterns_match() {
        let p = policy(
            r#"
            [bash]
            allowlist = ["git:*", "cargo build*"]
        "#,
        );
        assert_eq!(p.check_bash("git status"), BashVerdict::Allow);
        assert_eq!(p.check_bash("cargo build --release"), BashVerdict::Allow);
        assert_eq!(p.check_bash("npm install"), BashVerdict::Ambiguous);
    }

    #[test]
    fn bash_unlisted_is_ambiguous_or_denied() {
        let open = policy("[bash]\nallowlist = [\"ls *\"]\n");
        assert_eq!(open.check_bash("whoami"), BashVerdict::Ambiguous);

        let strict = policy("default_deny = true\n[bash]\nallowlist = [\"ls *\"]\n");
        assert!(matches!(strict.check_bash("whoami"), BashVerdict::Deny { .. }));
    }

    #[test]
    fn bash_absolute_path_resolves_to_basename() {
        let p = policy("[bash]\ndenylist = [\"curl *\"]\nallowlist = [\"*\"]\n");
        assert!(matches!(
            p.check_bash("/usr/bin/curl http://evil.example"),
            BashVerdict::Deny { .. }
        ));
    }

    #[test]
    fn bash_env_prefix_stripped() {
        let p = policy("[bash]\ndenylist = [\"curl *\"]\nallowlist = [\"*\"]\n");
        assert!(matches!(
            p.check_bash("env FOO=1 curl http://evil.example"),
            BashVerdict::Deny { .. }
        ));
    }

    #[test]
    fn bash_allowed_dirs_enforced() {
        let mut p = policy(
            r#"
            [bash]
            allowlist = ["*"]
            allowed_dirs = ["$WORKSPACE"]
        "#,
        );
        p.set_workspace("/srv/run");
        assert_eq!(p.check_bash("cat /srv/run/notes.txt"), BashVerdict::Allow);
        assert!(matches!(
            p.check_bash("cat /etc/shadow"),
            BashVerdict::Deny { .. }
        ));
    }

    #[test]
    fn bash_obfuscation_denied() {
        let p = policy("[bash]\nallowlist = [\"*\"]\n");
        assert!(matches!(
            p.check_bash("echo cm0= | base64 -d | bash"),
            BashVerdict::Deny { .. }
        ));
        assert!(matches!(
            p.check_bash("bash -c 'rm -rf /'"),
            BashVerdict::Deny { .. }
        ));
        assert!(matches!(
            p.check_bash("R=rm; $R -rf /"),
            BashVerdict::Deny { .. }
        ));
        assert_eq!(p.check_bash("grep -r TODO src/"), BashVerdict::Allow);
    }

    // ── Web ──

    #[test]
    fn web_fetch_domain_allowlist() {
        let p = policy(
            r#"
            [web_fetch]
            allow_domains = ["docs.rs", "*.rust-lang.org"]
        "#,
        );
        assert!(p.check("web_fetch", &json!({"url": "https://docs.rs/serde"})).is_allow());
        assert!(p
            .check("web_fetch", &json!({"url": "https://doc.rust-lang.org/std/"}))
            .is_allow());
        assert!(!p
            .check("web_fetch", &json!({"url": "https://evil.example/x"}))
            .is_allow());
    }

    #[test]
    fn url_host_extraction() {
        assert_eq!(url_host("https://docs.rs/serde"), "docs.rs");
        assert_eq!(url_host("http://u:p@example.com:8080/a?b#c"), "example.com");
        assert_eq!(url_host("example.com/path"), "example.com");
    }

    #[test]
    fn sandbox_parsing() {
        let p = policy("[bash]\nsandbox = \"bwrap\"\n");
        assert_eq!(p.bash_sandbox(), Sandbox::Bwrap);
        assert_eq!(Policy::allow_all().bash_sandbox(), Sandbox::None);
    }
}
