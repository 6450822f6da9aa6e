//! vigil-replay — chronological renderer for session logs
//!
//! Usage:
//!   vigil-replay run.jsonl             → render + stats (pager on a TTY)
//!   vigil-replay -v run.jsonl          → include tool traffic
//!   vigil-replay -f run.jsonl          → follow a live session
//!   vigil-replay --cost m:3,15 run.jsonl
//!
//! The replayer never writes to the session.

mod pager;
mod render;
mod stats;

use clap::Parser;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use render::RenderOptions;
use stats::{compute_stats, format_stats, parse_cost_spec, ModelPricing};

#[derive(Parser)]
#[command(
    name = "vigil-replay",
    about = "Replay vigil session logs with timeline and stats",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Session log files (.jsonl, or legacy single-object .json)
    files: Vec<PathBuf>,

    /// Increase verbosity (-v shows tool traffic, -vv full content)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Follow a live session file, reloading on change (single file only)
    #[arg(short, long)]
    follow: bool,

    /// Print to stdout instead of the interactive pager
    #[arg(long)]
    no_pager: bool,

    /// Per-model pricing as MODEL:IN,OUT dollars per 1M tokens (repeatable)
    #[arg(long = "cost", value_name = "MODEL:IN,OUT")]
    cost: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if cli.files.is_empty() {
        anyhow::bail!("no session files given; see --help");
    }
    if cli.follow && cli.files.len() != 1 {
        anyhow::bail!("--follow works on exactly one file");
    }

    let mut pricing: HashMap<String, ModelPricing> = HashMap::new();
    for spec in &cli.cost {
        let (model, price) = parse_cost_spec(spec).map_err(|e| anyhow::anyhow!(e))?;
        pricing.insert(model, price);
    }

    let opts = RenderOptions {
        verbosity: cli.verbose,
    };
    let render_file = |path: &Path| -> anyhow::Result<String> {
        let session = vigil_core::load_session(path)?;
        let mut out = render::render_session(&session, &opts);
        out.push('\n');
        out.push_str(&format_stats(&compute_stats(&session, &pricing)));
        Ok(out)
    };

    let use_pager = !cli.no_pager && std::io::stdout().is_terminal() && cli.files.len() == 1;

    if cli.follow || use_pager {
        let path = &cli.files[0];
        // Fail fast on unreadable input before entering the alternate screen.
        render_file(path)?;
        pager::run_pager(
            path,
            render_file,
            &pager::PagerOptions { follow: cli.follow },
        )?;
        return Ok(());
    }

    for (i, path) in cli.files.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print!("{}", render_file(path)?);
    }
    Ok(())
}
