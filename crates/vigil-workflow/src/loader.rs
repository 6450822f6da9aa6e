//! FROM resolution — prompt files, skill directories, skill search paths.
//!
//! A `.md` target loads as prompt text. A directory containing SKILL.md
//! loads its YAML frontmatter and takes the body as instructions; the
//! frontmatter `name` must equal the directory name. A bare name searches
//! the configured skill paths. `.agent` package references are rejected
//! here — packages resolve through a separate loader.

use crate::ast::Workflow;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use vigil_core::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct SkillFrontmatter {
    name: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: String,
    #[serde(default)]
    #[allow(dead_code)]
    license: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    metadata: Option<serde_yaml::Value>,
    #[serde(default, rename = "allowed-tools")]
    allowed_tools: Vec<String>,
}

pub struct LoadedSkill {
    pub dir: PathBuf,
    pub instructions: String,
    pub allowed_tools: Vec<String>,
}

/// Resolve every FROM reference in `wf` relative to `base_dir`, filling in
/// prompt bodies and skill metadata.
pub fn resolve_from_targets(
    wf: &mut Workflow,
    base_dir: &Path,
    skill_paths: &[PathBuf],
) -> Result<()> {
    for agent in &mut wf.agents {
        let Some(from) = agent.from.clone() else {
            continue;
        };
        match resolve_target(&from, base_dir, skill_paths, agent.line)? {
            Resolved::Prompt(text) => agent.prompt = text,
            Resolved::Skill(skill) => {
                agent.prompt = skill.instructions;
                agent.is_skill = true;
                agent.skill_dir = Some(skill.dir);
                agent.allowed_tools = skill.allowed_tools;
            }
        }
    }

    for goal in &mut wf.goals {
        let Some(from) = goal.from.clone() else {
            continue;
        };
        match resolve_target(&from, base_dir, skill_paths, goal.line)? {
            Resolved::Prompt(text) => goal.outcome = text,
            Resolved::Skill(_) => {
                return Err(Error::parse(
                    goal.line,
                    format!("goal '{}' cannot load a skill directory", goal.name),
                ));
            }
        }
    }

    Ok(())
}

enum Resolved {
    Prompt(String),
    Skill(LoadedSkill),
}

fn resolve_target(
    from: &str,
    base_dir: &Path,
    skill_paths: &[PathBuf],
    line: usize,
) -> Result<Resolved> {
    if from.ends_with(".agent") {
        return Err(Error::parse(
            line,
            format!("'{}' is a package reference; packages resolve through the package loader", from),
        ));
    }

    let direct = base_dir.join(from);

    if from.ends_with(".md") {
        let text = std::fs::read_to_string(&direct)
            .map_err(|e| Error::parse(line, format!("cannot load '{}': {}", from, e)))?;
        return Ok(Resolved::Prompt(text));
    }

    if direct.is_dir() {
        return load_skill_dir(&direct, line).map(Resolved::Skill);
    }

    // Bare name: search the configured skill paths.
    if !from.contains('/') {
        for root in skill_paths {
            let candidate = root.join(from);
            if candidate.join("SKILL.md").is_file() {
                debug!("skill '{}' found at {}", from, candidate.display());
                return load_skill_dir(&candidate, line).map(Resolved::Skill);
            }
        }
    }

    Err(Error::parse(
        line,
        format!("cannot resolve FROM target '{}'", from),
    ))
}

fn load_skill_dir(dir: &Path, line: usize) -> Result<LoadedSkill> {
    let skill_file = dir.join("SKILL.md");
    let content = std::fs::read_to_string(&skill_file).map_err(|e| {
        Error::parse(
            line,
            format!("'{}' has no loadable SKILL.md: {}", dir.display(), e),
        )
    })?;

    let (frontmatter, body) = split_frontmatter(&content)
        .ok_or_else(|| Error::parse(line, format!("{} is missing YAML frontmatter", skill_file.display())))?;

    let meta: SkillFrontmatter = serde_yaml::from_str(frontmatter)
        .map_err(|e| Error::parse(line, format!("bad SKILL.md frontmatter: {}", e)))?;

    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if meta.name != dir_name {
        return Err(Error::parse(
            line,
            format!(
                "skill name '{}' does not match its directory '{}'",
                meta.name, dir_name
            ),
        ));
    }

    Ok(LoadedSkill {
        dir: dir.to_path_buf(),
        instructions: body.trim().to_string(),
        allowed_tools: meta.allowed_tools,
    })
}

/// Split `---\nyaml\n---\nbody`. Returns (yaml, body).
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    let yaml = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('-');
    Some((yaml, body))
}
