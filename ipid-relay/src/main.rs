//! ipid-relay — entry point.
//!
//! ```text
//! ipid-relay                      Run with ./ipid-relay.toml (or defaults)
//! ipid-relay --config <path>      Load a custom config TOML
//! ipid-relay --gen-config         Write default config to stdout
//! ipid-relay --init-config        Write default config to the --config path
//! ipid-relay --bus host:port      Override the broker address
//! ```
//!
//! Environment variables (`MEAN_DELAY_MS`, `WINDOW_SIZE`,
//! `MITIGATE_ACTIVE`, `COVERT_ACTIVE`, ...) override the file. On Unix,
//! `SIGUSR1` / `SIGUSR2` switch the ground-truth label on / off.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipid_relay::config::RelayConfig;
use ipid_relay::service::{RelayService, spawn_label_signals};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ipid-relay", about = "Covert-channel detecting relay between two bus segments")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "ipid-relay.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    init_config: bool,

    /// Broker address, overrides file and environment.
    #[arg(long)]
    bus: Option<String>,

    /// Enable identification reseeding.
    #[arg(long)]
    mitigate: bool,

    /// Directory for per-run metrics output.
    #[arg(long)]
    results_dir: Option<PathBuf>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", RelayConfig::default().to_toml()?);
        return Ok(());
    }

    // --init-config: create a starting config file and exit.
    if cli.init_config {
        RelayConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    // Load config: file, then environment, then flags.
    let mut config = RelayConfig::load(&cli.config);
    config.apply_process_env()?;
    if let Some(bus) = cli.bus {
        config.bus.address = bus;
    }
    if cli.mitigate {
        config.mitigation.active = true;
    }
    if let Some(dir) = cli.results_dir {
        config.metrics.results_dir = dir;
    }
    config.validate()?;

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    info!("ipid-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("bus: {}", config.bus.address);
    info!("mean delay: {} ms", config.forward.mean_delay_ms);
    info!(
        "detector: window={} strategy={} timing={} labels={}",
        config.detector.window_size,
        config.detector.strategy,
        config.detector.timing,
        config.detector.label_mode
    );
    info!("mitigation: {}", if config.mitigation.active { "on" } else { "off" });

    let service = RelayService::new(config);
    let stop = service.stop_handle();
    spawn_label_signals(service.label_handle())?;

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
