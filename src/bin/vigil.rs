//! vigil — execute an agent workflow under supervision
//!
//! Usage:
//!   vigil flow.vgl                         → run with config defaults
//!   vigil flow.vgl -i topic=rust           → override an input
//!   vigil flow.vgl --policy policy.toml -o run.jsonl
//!
//! The session log lands as JSONL; replay it with vigil-replay.

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_agent::{ExecEnv, Orchestrator, DEFAULT_MAX_REORIENTS, DEFAULT_MAX_TOOL_CALLS};
use vigil_core::config::{SessionStore, VigilConfig};
use vigil_core::{SessionLog, SessionStatus};
use vigil_llm::profiles;
use vigil_security::SecurityPipeline;
use vigil_tools::{create_default_registry, Policy};

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Supervised agent-workflow executor",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Workflow file
    workflow: PathBuf,

    /// Config file (default: ~/.vigil/vigil.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Policy file (default: allow everything, workspace-scoped)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Input overrides as name=value (repeatable)
    #[arg(short, long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<String>,

    /// Session log output path (default: from config, or <workflow>.jsonl)
    #[arg(short = 'o', long)]
    session_out: Option<PathBuf>,

    /// Workspace directory (default: from config, or cwd)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Additional skill search paths (repeatable)
    #[arg(long = "skill-path")]
    skill_paths: Vec<PathBuf>,

    /// Write logs to a file (in addition to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    let config = match &cli.config {
        Some(path) => VigilConfig::load(path)?,
        None => VigilConfig::discover(),
    };

    let workspace = cli
        .workspace
        .clone()
        .unwrap_or_else(|| config.workspace());
    let credential_dir = std::env::current_dir()?;

    let mut policy = match &cli.policy {
        Some(path) => Policy::load(path)?,
        None => Policy::allow_all(),
    };
    policy.set_workspace(workspace.display().to_string());

    let workflow = vigil_workflow::load_workflow(&cli.workflow, &cli.skill_paths)?;
    info!(workflow = %workflow.name, "loaded workflow");

    // Models: primary drives goals and execution supervision, small drives
    // security triage and ambiguous-bash checks.
    let primary = profiles::resolve_primary(&config, &credential_dir)?;
    let small = profiles::resolve_small(&config, &credential_dir)?;
    let mut profile_models = HashMap::new();
    for agent in &workflow.agents {
        if let Some(name) = &agent.profile {
            if !profile_models.contains_key(name) {
                let resolved = profiles::resolve_profile(&config, name, &credential_dir)?;
                profile_models.insert(name.clone(), resolved);
            }
        }
    }

    let security = SecurityPipeline::new(config.security.mode)
        .with_triage(small)
        .with_supervisor(primary.clone());

    let memory_file = match (&config.storage.path, config.storage.persist_memory) {
        (Some(path), Some(true)) => {
            Some(vigil_core::config::expand_tilde(path).join("memory.json"))
        }
        _ => None,
    };
    let registry = create_default_registry(&workspace, &policy, memory_file);

    if config.session.store == Some(SessionStore::Sqlite) {
        warn!("session.store = sqlite is not available in this build, using the file store");
    }
    let session_path = cli.session_out.clone().unwrap_or_else(|| {
        let dir = config
            .session
            .path
            .as_deref()
            .map(|p| vigil_core::config::expand_tilde(p))
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(format!(
            "{}-{}.jsonl",
            workflow.name,
            chrono::Utc::now().format("%Y%m%dT%H%M%S")
        ))
    });

    let mut input_overrides = HashMap::new();
    for pair in &cli.inputs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("bad --input '{}', expected NAME=VALUE", pair))?;
        input_overrides.insert(k.to_string(), v.to_string());
    }

    let log = Arc::new(SessionLog::create(
        workflow.name.clone(),
        input_overrides.clone(),
        Some(&session_path),
    )?);
    info!(session = %session_path.display(), id = %log.id(), "session created");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, canceling run");
                cancel.cancel();
            }
        });
    }

    let env = Arc::new(ExecEnv {
        log,
        tools: Arc::new(registry),
        policy: Arc::new(policy),
        security: Arc::new(security),
        primary: primary.clone(),
        supervisor: primary,
        profiles: profile_models,
        max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
        max_reorients: DEFAULT_MAX_REORIENTS,
    });

    let outcome = Orchestrator::new(env, workflow, input_overrides, cancel)?
        .run()
        .await?;

    match outcome.status {
        SessionStatus::Complete => {
            println!("{}", outcome.result);
            info!(session = %session_path.display(), "run complete");
            Ok(())
        }
        _ => {
            eprintln!("run failed: {}", outcome.error);
            eprintln!("session log: {}", session_path.display());
            std::process::exit(1);
        }
    }
}

fn init_tracing(
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vigil=info".into());

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().unwrap_or_else(|| "vigil.log".as_ref());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            Ok(None)
        }
    }
}
