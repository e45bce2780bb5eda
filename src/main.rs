//! # AutoClaw — screen-driven task orchestration bot
//!
//! Usage:
//!   autoclaw                              # Run with ~/.autoclaw/config.toml
//!   autoclaw --config bot.toml            # Custom config
//!   autoclaw --validate                   # Check config and playbooks, then exit
//!   autoclaw --run daily_login            # Enqueue a playbook right away

use std::sync::Arc;

use anyhow::{Context, Result};
use autoclaw_core::config::{AutoClawConfig, expand_path};
use autoclaw_core::mock::ScriptedDesktop;
use autoclaw_core::traits::Desktop;
use autoclaw_scheduler::{Orchestrator, PlaybookRegistry, StateStore, TriggerEngine, task_queue};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "autoclaw",
    version,
    about = "🦀 AutoClaw — playbooks, retries, watcher and triggers over one input channel"
)]
struct Cli {
    /// Config file (default: ~/.autoclaw/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the state file path
    #[arg(long)]
    state: Option<String>,

    /// Override the playbook directory
    #[arg(long)]
    playbooks: Option<String>,

    /// Validate config, playbooks and triggers, then exit
    #[arg(long)]
    validate: bool,

    /// Playbooks to enqueue at startup
    #[arg(long = "run", value_name = "PLAYBOOK")]
    run: Vec<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "autoclaw=debug,autoclaw_core=debug,autoclaw_scheduler=debug"
    } else {
        "autoclaw=info,autoclaw_core=info,autoclaw_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => AutoClawConfig::load_from(&expand_path(path))?,
        None => AutoClawConfig::load()?,
    };
    if let Some(state) = cli.state {
        config.state.path = state;
    }
    if let Some(dir) = cli.playbooks {
        config.playbooks.dir = dir;
    }

    let registry = Arc::new(PlaybookRegistry::load(&config.playbooks).context("Playbook validation failed")?);
    if config.watcher.enabled {
        registry.ensure(&config.watcher.on_increase, "watcher")?;
    }

    if cli.validate {
        let store = Arc::new(StateStore::in_memory());
        let (queue, _rx) = task_queue();
        let engine = TriggerEngine::new(&config.triggers, registry.clone(), queue, store)?;
        println!("✅ Configuration OK");
        println!("   Playbooks: {}", registry.names().join(", "));
        println!("   Triggers:  {}", engine.trigger_count());
        return Ok(());
    }

    let state_path = expand_path(&config.state.path);
    let store = Arc::new(
        StateStore::open_file(&state_path)
            .with_context(|| format!("Cannot open state file {}", state_path.display()))?,
    );

    // No OS backend is linked into this binary; the scripted desktop logs
    // every gesture instead of performing it.
    tracing::warn!("🧪 Running with the dry-run desktop backend");
    let desktop = Desktop::from_backend(Arc::new(ScriptedDesktop::dry_run()));

    let orchestrator = Orchestrator::start(&config, desktop, store, registry)?;
    for name in &cli.run {
        orchestrator.submit(name)?;
    }

    tokio::signal::ctrl_c().await?;
    orchestrator.shutdown().await;
    Ok(())
}
