//! vwall head: entry point.
//!
//! ```text
//! vwall-head                    Stream using vwall-head.toml
//! vwall-head --config <path>    Load a custom config TOML
//! vwall-head --source <path>    Stream images from a file or directory
//! vwall-head --gen-config       Write default config to stdout
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vwall_head::config::{HeadConfig, SourceKind};
use vwall_head::service::HeadService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vwall-head", about = "Video wall head: splits frames and streams tiles to the displays")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vwall-head.toml")]
    config: PathBuf,

    /// Image file or directory to stream; overrides `[source]`.
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Number of display nodes; must equal rows * columns.
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HeadConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Logging is configured from the file, so a bad file is reported on stderr directly.
    let mut config = match HeadConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vwall-head: {e}");
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.source {
        config.source.kind = SourceKind::Images;
        config.source.path = path;
    }
    if let Some(nodes) = cli.nodes {
        config.network.nodes = nodes;
    }

    // Init tracing. Stage threads share one locked stderr so lines never interleave.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(io::stderr()))
        .with_thread_names(true)
        .init();

    info!("vwall-head v{}", env!("CARGO_PKG_VERSION"));
    if !cli.config.exists() {
        info!("no config at {}; using defaults", cli.config.display());
    }
    info!(
        "grid: {}x{} tiles of {}x{}",
        config.grid.columns, config.grid.rows, config.grid.tile_width, config.grid.tile_height
    );
    info!("stream port: {}", config.network.stream_port);
    info!("codec: {} ({})", config.encoding.codec, config.network.framing);

    let service = HeadService::new(config);
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };

    match service.run_until(shutdown).await {
        Ok(Some(summary)) => {
            info!(
                frames = summary.frames_composited,
                "session complete: {}", summary.broadcast
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            error!("fatal: {e}");
            std::process::exit(1);
        }
    }
}
