//! # Chime: persistent timer dispatch daemon
//!
//! Keeps reminders and timed moderation actions in SQLite and fires each one
//! when due, even across restarts.
//!
//! Usage:
//!   chime                          # ~/.chime/config.toml, timers in ~/.chime/timers.db
//!   chime --config ./chime.toml    # Custom config
//!   chime --in-memory -v           # Throwaway store, debug logging
//!   chime --init-config            # Write the default config and exit

mod console;
mod handlers;

use anyhow::Result;
use chime_core::ChimeConfig;
use chime_timers::{EventBus, MemoryStore, SqliteTimerStore, TimerEngine, TimerStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chime", version, about = "⏰ Chime — persistent timer dispatch daemon")]
struct Cli {
    /// Config file (default: ~/.chime/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep timers in memory only
    #[arg(long)]
    in_memory: bool,

    /// Author id used for console commands
    #[arg(long, default_value = "0")]
    author: i64,

    /// Channel id reminders are delivered to
    #[arg(long, default_value = "0")]
    channel: i64,

    /// Write the default config to ~/.chime/config.toml and exit
    #[arg(long)]
    init_config: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init_config {
        let path = ChimeConfig::default_path();
        if path.exists() {
            println!("⚠️  Config '{}' already exists.", path.display());
        } else {
            ChimeConfig::default().save()?;
            println!("✅ Default config written to {}", path.display());
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => ChimeConfig::load_from(path)?,
        None => ChimeConfig::load()?,
    };

    // Initialize logging
    let level = if cli.verbose { "debug" } else { config.log.level.as_str() };
    let filter = format!("chime={level},chime_timers={level}");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let store: Arc<dyn TimerStore> = if cli.in_memory {
        Arc::new(MemoryStore::new())
    } else {
        let path = config.store.resolved_path();
        tracing::info!("🗄️ Timer store: {}", path.display());
        Arc::new(SqliteTimerStore::open(&path)?)
    };

    let bus = Arc::new(EventBus::new(config.engine.bus_capacity));
    handlers::register_all(&bus);

    let engine = TimerEngine::builder(store, bus)
        .config(config.engine.clone())
        .store_timeout(config.store.timeout())
        .build();
    engine.start()?;

    println!("⏰ Chime v{}", env!("CARGO_PKG_VERSION"));
    println!("   Type 'help' for commands, 'quit' to exit.");
    println!();

    let session = console::Session {
        author_id: cli.author,
        channel_id: cli.channel,
    };
    tokio::select! {
        result = console::run(&engine, session) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C, shutting down"),
    }

    engine.shutdown().await;
    Ok(())
}
