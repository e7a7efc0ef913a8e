use clap::Parser;

use hdproxy::cli::Cli;
use hdproxy::lifecycle::{signals, Gateway};
use hdproxy::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let cli = Cli::parse();

    tracing::info!("hdproxy v{} starting", env!("CARGO_PKG_VERSION"));

    let configs = cli.proxy_configs()?;
    let settings = cli.settings();

    if let Some(addr) = settings.metrics_address {
        metrics::init_metrics(addr)?;
    }

    let gateway = Gateway::build(&configs, &settings)?;
    let running = gateway.start().await?;

    let outcome = running.run_until(signals::termination()).await;
    if !outcome.drained {
        tracing::warn!("Exited with work still in flight");
    }
    Ok(())
}
