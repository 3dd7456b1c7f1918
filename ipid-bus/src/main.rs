//! ipid-bus — packet bus broker.
//!
//! ```text
//! ipid-bus                        Listen on 0.0.0.0:4222
//! ipid-bus --listen 127.0.0.1:5000
//! ```

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipid_core::Broker;

#[derive(Parser, Debug)]
#[command(name = "ipid-bus", about = "Publish/subscribe broker carrying link-layer frames")]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "0.0.0.0:4222")]
    listen: String,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ipid-bus v{}", env!("CARGO_PKG_VERSION"));
    let broker = Broker::bind(&cli.listen).await?;
    broker
        .run_until(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
        })
        .await?;

    Ok(())
}
