//! Runner configuration — serde structs for vigil.toml
//!
//! Pure types and parsing only. Provider construction lives in vigil-llm.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub small_llm: Option<LlmSection>,
    pub embedding: Option<EmbeddingSection>,
    pub profiles: HashMap<String, ProfileSection>,
    pub storage: StorageSection,
    pub security: SecuritySection,
    pub session: SessionSection,
    pub telemetry: TelemetrySection,
    pub mcp: McpSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub thinking: Option<ThinkingLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Auto,
    Off,
    Low,
    Medium,
    High,
}

/// Opaque to the core — forwarded to the memory subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// A named capability profile, referenced by `AGENT … REQUIRES "<name>"`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub thinking: Option<ThinkingLevel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub path: Option<String>,
    pub persist_memory: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub mode: SecurityMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    #[default]
    Default,
    Paranoid,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub store: Option<SessionStore>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStore {
    File,
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub enabled: Option<bool>,
    pub protocol: Option<String>,
    pub endpoint: Option<String>,
}

/// External tool servers — opaque to the core; denied_tools is honored by
/// the registry when a server is mounted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McpSection {
    pub servers: HashMap<String, McpServer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McpServer {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub denied_tools: Vec<String>,
}

impl VigilConfig {
    /// Load from a specific path. A missing file is a hard error; a present
    /// but malformed file reports the TOML error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the default path if present, otherwise defaults.
    pub fn discover() -> Self {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Default path: ~/.vigil/vigil.toml
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".vigil").join("vigil.toml")
    }

    /// Workspace from config, or the current directory.
    pub fn workspace(&self) -> PathBuf {
        self.agent
            .workspace
            .as_ref()
            .map(|w| expand_tilde(w))
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// The triage/summarize model config: `small_llm`, falling back to `llm`.
    pub fn small_llm(&self) -> &LlmSection {
        self.small_llm.as_ref().unwrap_or(&self.llm)
    }

    /// Resolve a capability profile by name.
    pub fn profile(&self, name: &str) -> Option<&ProfileSection> {
        self.profiles.get(name)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
