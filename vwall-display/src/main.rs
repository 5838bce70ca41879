//! vwall display node: entry point.
//!
//! ```text
//! vwall-display                   Connect with vwall-display.toml
//! vwall-display --config <path>   Use custom config TOML
//! vwall-display --head <addr>     Head address (overrides config)
//! vwall-display --gen-config      Dump default config and exit
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vwall_display::config::DisplayConfig;
use vwall_display::service::DisplayService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vwall-display", about = "Video wall display node: renders one tile of the head's stream")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vwall-display.toml")]
    config: PathBuf,

    /// Head address (overrides config). Example: 192.168.1.10:7400
    #[arg(long)]
    head: Option<String>,

    /// Framebuffer device (overrides config). Empty runs headless.
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&DisplayConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Logging is configured from the file, so a bad file is reported on stderr directly.
    let mut config = match DisplayConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vwall-display: {e}");
            std::process::exit(1);
        }
    };
    if let Some(addr) = cli.head {
        config.network.head_address = addr;
    }
    if let Some(device) = cli.device {
        config.display.device = device;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(io::stderr()))
        .init();

    info!("vwall-display v{}", env!("CARGO_PKG_VERSION"));
    if !cli.config.exists() {
        info!("no config at {}; using defaults", cli.config.display());
    }
    info!("head: {}", config.network.head_address);
    info!(
        "output: {} {}x{} at ({}, {})",
        config.display.device.display(),
        config.display.width,
        config.display.height,
        config.display.x,
        config.display.y
    );

    let service = DisplayService::new(config);
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };

    match service.run_until(shutdown).await {
        Ok(Some(summary)) => {
            info!(
                rendered = summary.render.rendered,
                received = summary.receive.messages,
                decode_failures = summary.decode.failed,
                "head stream ended"
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
