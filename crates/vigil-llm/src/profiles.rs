//! Capability-profile resolution: config section → concrete provider + model.
//!
//! An agent's `REQUIRES "<name>"` tag maps to `profiles.<name>` in the
//! config; goals without a tag use the primary `llm` section. The security
//! triage tier uses `small_llm`, falling back to `llm`.

use crate::anthropic::AnthropicProvider;
use crate::provider::LlmProvider;
use std::path::Path;
use std::sync::Arc;
use vigil_core::config::{LlmSection, ProfileSection, VigilConfig};
use vigil_core::{credentials, Error, Result};

/// A provider plus the model parameters to call it with.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ResolvedModel {
    /// Wrap an already-built provider, used by tests and the runner when a
    /// scripted provider is injected.
    pub fn with_provider(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: None,
        }
    }
}

fn build(
    provider_name: &str,
    model: &str,
    base_url: Option<&str>,
    api_key_env: Option<&str>,
    max_tokens: Option<u32>,
    credential_dir: &Path,
) -> Result<ResolvedModel> {
    match provider_name {
        "anthropic" => {
            let key = credentials::lookup("anthropic", api_key_env, credential_dir)?;
            let mut p = AnthropicProvider::new(key);
            if let Some(url) = base_url {
                p = p.with_base_url(url);
            }
            Ok(ResolvedModel {
                provider: Arc::new(p),
                model: model.to_string(),
                max_tokens,
            })
        }
        other => Err(Error::config(format!("unknown llm provider '{}'", other))),
    }
}

fn from_section(section: &LlmSection, credential_dir: &Path) -> Result<ResolvedModel> {
    let provider = section.provider.as_deref().unwrap_or("anthropic");
    let model = section
        .model
        .as_deref()
        .ok_or_else(|| Error::config("llm.model is not set"))?;
    build(
        provider,
        model,
        section.base_url.as_deref(),
        section.api_key_env.as_deref(),
        section.max_tokens,
        credential_dir,
    )
}

/// Primary model from the `llm` section.
pub fn resolve_primary(cfg: &VigilConfig, credential_dir: &Path) -> Result<ResolvedModel> {
    from_section(&cfg.llm, credential_dir)
}

/// Triage/summarize model: `small_llm`, falling back to `llm`.
pub fn resolve_small(cfg: &VigilConfig, credential_dir: &Path) -> Result<ResolvedModel> {
    from_section(cfg.small_llm(), credential_dir)
}

/// Model for a named capability profile. Unset profile fields inherit from
/// the primary `llm` section.
pub fn resolve_profile(
    cfg: &VigilConfig,
    name: &str,
    credential_dir: &Path,
) -> Result<ResolvedModel> {
    let profile: &ProfileSection = cfg
        .profile(name)
        .ok_or_else(|| Error::config(format!("unknown capability profile '{}'", name)))?;

    let provider = profile
        .provider
        .as_deref()
        .or(cfg.llm.provider.as_deref())
        .unwrap_or("anthropic");
    let model = profile
        .model
        .as_deref()
        .or(cfg.llm.model.as_deref())
        .ok_or_else(|| Error::config(format!("profile '{}' has no model", name)))?;
    build(
        provider,
        model,
        profile.base_url.as_deref().or(cfg.llm.base_url.as_deref()),
        cfg.llm.api_key_env.as_deref(),
        cfg.llm.max_tokens,
        credential_dir,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_is_config_error() {
        let cfg = VigilConfig::default();
        let dir = std::env::temp_dir();
        let err = resolve_profile(&cfg, "nope", &dir).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let cfg: VigilConfig =
            toml::from_str("[llm]\nprovider = \"martian\"\nmodel = \"m\"").unwrap();
        let dir = std::env::temp_dir();
        let err = resolve_primary(&cfg, &dir).unwrap_err();
        assert!(err.to_string().contains("martian"));
    }
}
