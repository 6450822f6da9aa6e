//! Error types for vigil

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("policy denied {tool}: {reason}")]
    PolicyDeny { tool: String, reason: String },

    #[error("security denied {tool}: {reason}")]
    SecurityDeny { tool: String, reason: String },

    #[error("tool error: {name} - {message}")]
    Tool { name: String, message: String },

    #[error("llm error: {0}")]
    Llm(String),

    #[error("goal '{goal}' paused, human required: {reason}")]
    HumanRequired { goal: String, reason: String },

    #[error("session io error: {0}")]
    SessionIo(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn policy_deny(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PolicyDeny {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn security_deny(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SecurityDeny {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should abort the whole run rather than one goal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::Config(_)
                | Self::Credential(_)
                | Self::SessionIo(_)
                | Self::Canceled
        )
    }
}
