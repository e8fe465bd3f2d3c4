//! TAS agent — entry point.
//!
//! ```text
//! tas-agent                      Connect using tas-agent.toml
//! tas-agent --pid 4242           Attach to a specific process
//! tas-agent --simulate           Drive the built-in simulated game
//! tas-agent --editor host:port   Override the editor address
//! tas-agent --once               Exit after the first editor session
//! tas-agent --gen-config         Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tas_agent::config::{AgentConfig, BackendKind};
use tas_agent::service::AgentService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tas-agent", about = "Frame-advance agent for TAS editing")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tas-agent.toml")]
    config: PathBuf,

    /// Process id of the game (overrides the config).
    #[arg(long)]
    pid: Option<u64>,

    /// Use the simulated backend regardless of the config.
    #[arg(long)]
    simulate: bool,

    /// Editor address, `host:port` (overrides the config).
    #[arg(long)]
    editor: Option<String>,

    /// Serve a single editor session, then exit.
    #[arg(long)]
    once: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = AgentConfig::load(&cli.config);
    if let Some(pid) = cli.pid {
        config.target.process_id = pid;
    }
    if cli.simulate {
        config.target.backend = BackendKind::Simulated;
    }
    if let Some(editor) = cli.editor {
        config.network.editor_address = editor;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tas-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("editor: {}", config.network.editor_address);
    info!(
        "target: pid {} ({:?} backend)",
        config.target.process_id, config.target.backend
    );
    info!("regions: {}", config.session.regions.len());

    let service = AgentService::new(config).with_once(cli.once);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    tokio::task::spawn_blocking(move || service.run()).await??;

    Ok(())
}
