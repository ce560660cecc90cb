//! CLI entry point for quickstep.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quickstep_app::QuickstepConfig;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;

/// Recents task-data core: simulator and gesture routing explainer.
#[derive(Parser, Debug)]
#[command(
    name = "quickstep",
    version,
    about = "quickstep: recents task caching and gesture input routing"
)]
struct Cli {
    /// Configuration file (defaults to <config dir>/quickstep/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a synthetic recent task list and print the resulting task data.
    Simulate {
        /// Tasks in the synthetic list.
        #[arg(long, default_value_t = 6)]
        tasks: usize,
        /// Leading tasks marked visible.
        #[arg(long, default_value_t = 3)]
        visible: usize,
        /// Artificial latency of every icon and thumbnail call.
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
        /// Show overview after loading so thumbnails upgrade to full resolution.
        #[arg(long)]
        high_res: bool,
    },

    /// Explain which input consumer a gesture context selects.
    ExplainConsumer {
        /// JSON file holding `context`, an optional `event` and `follow_up` events.
        file: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let Cli { config, cmd } = Cli::parse();
    install_tracing();

    let config = QuickstepConfig::load(config.as_deref())?;
    commands::run(cmd, &config)
}

fn install_tracing() {
    // RUST_LOG is honoured; INFO by default. Logs go to stderr, reports to stdout.
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
