use anyhow::Result;
use clap::Parser;
use tracing::info;

use reef_relay::cli::{Cli, Commands};
use reef_relay::{routes, telemetry, watch, AppState, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;
    let cli = Cli::parse();

    if let Some(Commands::Watch(args)) = cli.command {
        return watch::run_watch(args).await;
    }

    let config = RelayConfig::try_from(cli.serve)?;
    let metrics = if config.metrics_enabled {
        Some(telemetry::install_metrics()?)
    } else {
        None
    };
    info!(
        listen_addr = %config.listen_addr,
        upstream = %config.upstream_url,
        keepalive_secs = config.keepalive.as_secs(),
        phantom_delay_ms = config.phantom_delay.as_millis() as u64,
        "starting reef-relay"
    );

    routes::serve(AppState::new(config, metrics)).await
}
