//! Lumen headless client entry point.
//!
//! ```text
//! lumen-client                      Serve host requests on stdin/stdout
//! lumen-client --replay <file>      Stream the given Annex-B recording
//! lumen-client --config <path>      Use custom config TOML
//! lumen-client --gen-config         Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lumen_core::video::TextureSize;
use lumen_core::{Collaborators, ControlEvent, ControlLoop};
use lumen_core::session::NullInput;

use lumen_client::config::ClientConfig;
use lumen_client::headless::{HeadlessDecoder, HeadlessSurface, OfflineHttp, OfflinePairing};
use lumen_client::replay::ReplayTransport;
use lumen_client::stdio;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lumen-client", about = "Headless game-stream client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lumen-client.toml")]
    config: PathBuf,

    /// Annex-B H.264 recording to replay (overrides config).
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(path) = cli.replay {
        config.replay.file = path;
    }

    // Stdout carries the host protocol, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("lumen-client v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Wire the pipeline ────────────────────────────────────

    let presented = Arc::new(AtomicU64::new(0));
    let decoder = Arc::new(HeadlessDecoder::new(
        config.decoder.texture_pool,
        TextureSize::default(),
    ));
    let (host_tx, host_rx) = mpsc::unbounded_channel();

    let control = ControlLoop::new(
        Collaborators {
            transport: Arc::new(ReplayTransport::new(config.replay.clone())),
            decoder: decoder.clone(),
            surface: Box::new(HeadlessSurface::new(presented.clone())),
            input: Arc::new(NullInput),
            http: Arc::new(OfflineHttp),
            pairing: Arc::new(OfflinePairing),
        },
        config.session_options(),
        host_tx,
    );
    let events = control.sender();
    let control_handle = tokio::spawn(control.run());
    let writer_handle = tokio::spawn(stdio::write_messages(tokio::io::stdout(), host_rx));

    // ── 2. Serve the host ───────────────────────────────────────

    tokio::select! {
        result = stdio::forward_requests(tokio::io::stdin(), &events) => {
            if let Err(e) = result {
                error!("host input failed: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    // ── 3. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    events.send(ControlEvent::Shutdown)?;
    drop(events);
    control_handle.await??;
    if let Err(e) = writer_handle.await? {
        error!("host output failed: {e}");
    }

    info!(
        presented = presented.load(Ordering::Relaxed),
        decoded = decoder.decoded(),
        dropped = decoder.dropped(),
        "session totals"
    );
    Ok(())
}
