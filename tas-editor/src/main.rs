//! TAS editor — entry point.
//!
//! ```text
//! tas-editor                         Wait for an agent, play one frame
//! tas-editor --script run.json       Play a saved script
//! tas-editor --frames 600            Play (and extend to) 600 frames
//! tas-editor --framebuffer           Capture a screenshot with every frame
//! tas-editor --joystick pad.json     Write a joystick recording into the script
//! tas-editor --gen-config            Dump default config and exit
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tas_core::controller::InputMapping;
use tas_editor::config::EditorConfig;
use tas_editor::joystick;
use tas_editor::{EditorEvent, EditorServer, InputScript, MemoryRegionStreamer};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tas-editor", about = "TAS editor backend")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tas-editor.toml")]
    config: PathBuf,

    /// Input script (JSON). Created if it does not exist.
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Number of frames to play; the script is extended if shorter.
    #[arg(short, long)]
    frames: Option<u32>,

    /// Request the framebuffer with every frame.
    #[arg(long)]
    framebuffer: bool,

    /// Joystick recording (JSON) to write into the script before playing.
    #[arg(short, long)]
    joystick: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&EditorConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = EditorConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tas-editor v{}", env!("CARGO_PKG_VERSION"));
    info!("project: {} ({})", config.project.name, config.project.directory.display());

    // ── 1. Script ───────────────────────────────────────────────

    let mut script = match &cli.script {
        Some(path) if path.exists() => InputScript::load(path)?,
        _ => InputScript::new(1)?.with_name(config.project.name.clone()),
    };
    if let Some(path) = &cli.joystick {
        let mapping = InputMapping::parse(&config.input.mapping)?;
        let inputs = joystick::load_recording(path)?;
        let applied = joystick::replay(&mut script, &mapping, &inputs)?;
        info!("joystick: {applied} of {} inputs mapped", inputs.len());
    }
    let frames = cli.frames.unwrap_or_else(|| script.frame_count());
    while script.frame_count() < frames {
        script.add_frame();
    }
    info!("script: {} frames, {} players", script.frame_count(), script.player_count());

    // ── 2. Region files ─────────────────────────────────────────

    let mut streamer = MemoryRegionStreamer::new(&config.project.directory);
    for region in &config.project.regions {
        streamer.open_region(region)?;
    }

    // ── 3. Wait for the agent ───────────────────────────────────

    let mut server = EditorServer::bind(config.network.listen_address.as_str()).await?;
    let events = server.accept().await?;
    let sink = tokio::spawn(consume_events(
        events,
        streamer,
        config.project.directory.clone(),
    ));

    server.set_project_name(&config.project.name).await?;
    server.set_controller_number(script.player_count()).await?;
    server.request_game_info().await?;

    // ── 4. Play ─────────────────────────────────────────────────

    for frame in 0..frames {
        script.set_current_frame(frame)?;
        match server.request_frame_advance(&script, cli.framebuffer).await {
            Ok(done) if done.success => debug!(frame, sequence = done.sequence, "frame done"),
            Ok(done) => warn!(frame, sequence = done.sequence, "agent could not run frame"),
            Err(e) => {
                error!("frame {frame}: {e}");
                break;
            }
        }
    }

    // ── 5. Shutdown ─────────────────────────────────────────────

    if let Some(path) = &cli.script {
        script.save(path)?;
        info!("script saved to {}", path.display());
    }

    server.disconnect();
    match tokio::time::timeout(Duration::from_secs(5), sink).await {
        Ok(Ok(mut streamer)) => streamer.close_all()?,
        Ok(Err(e)) => warn!("event task failed: {e}"),
        Err(_) => warn!("agent did not close the connection"),
    }

    Ok(())
}

/// Persist what the agent sends until it disconnects.
async fn consume_events(
    mut events: mpsc::UnboundedReceiver<EditorEvent>,
    mut streamer: MemoryRegionStreamer,
    project_dir: PathBuf,
) -> MemoryRegionStreamer {
    while let Some(event) = events.recv().await {
        match event {
            EditorEvent::CapturedRegion(region) => {
                if let Err(e) = streamer.write_chunk(region.region_id, region.offset, &region.bytes) {
                    warn!("region {} chunk dropped: {e}", region.region_id);
                }
            }
            EditorEvent::Framebuffer(jpeg) => save_framebuffer(&project_dir, &jpeg),
            EditorEvent::GameInfo(info) => info!(
                "game: {} (pid {}, program {:#018x}, user {})",
                info.game_name, info.process_id, info.program_id, info.user_nickname
            ),
            EditorEvent::Paused(paused) => info!("agent paused: {paused}"),
            EditorEvent::FrameCompleted(_) => {}
            EditorEvent::Disconnected => break,
        }
    }
    streamer
}

fn save_framebuffer(project_dir: &Path, jpeg: &[u8]) {
    let path = project_dir.join("framebuffer.jpg");
    if let Err(e) = std::fs::create_dir_all(project_dir).and_then(|()| std::fs::write(&path, jpeg)) {
        warn!("could not save framebuffer: {e}");
    }
}
