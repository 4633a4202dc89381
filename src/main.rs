// SPDX-License-Identifier: MIT

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use vrf_fulfiller::app::config::Settings;
use vrf_fulfiller::app::logging::setup_logging;
use vrf_fulfiller::common::error::AppError;
use vrf_fulfiller::core::mailbox::Mailbox;
use vrf_fulfiller::data::db::Database;
use vrf_fulfiller::data::txm::TxManager;
use vrf_fulfiller::network::broadcaster::LogBroadcaster;
use vrf_fulfiller::network::coordinator::{ChainClient, OnchainCoordinator};
use vrf_fulfiller::network::prover::HttpProver;
use vrf_fulfiller::network::provider::ConnectionFactory;
use vrf_fulfiller::services::vrf::pipeline::SimulationPipeline;
use vrf_fulfiller::services::vrf::stats::{VrfStats, spawn_metrics_server};
use vrf_fulfiller::services::vrf::{VrfJobConfig, VrfListener};

#[derive(Parser, Debug)]
#[command(author, version, about = "VRF request fulfillment service")]
struct Cli {
    /// Path to config file (default: config.{toml,yaml,...})
    #[arg(long)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Metrics port (overrides config/env)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let settings = Settings::load_with_path(cli.config.as_deref())?;
    setup_logging(if settings.debug { "debug" } else { "info" }, cli.json_logs);

    tracing::info!(
        coordinator = %settings.coordinator_address,
        key_hash = %settings.key_hash,
        from = %settings.from_address,
        "Starting VRF fulfiller"
    );

    let db = Database::new(&settings.database_url).await?;
    let (ws, http) = ConnectionFactory::preferred(settings.ws_url.as_deref(), &settings.rpc_url).await?;

    let coordinator = Arc::new(OnchainCoordinator::new(
        settings.coordinator_address,
        http.clone(),
    ));
    let chain = Arc::new(ChainClient::new(http.clone()));
    let prover = Arc::new(HttpProver::new(&settings.prover_url)?);
    let pipeline = Arc::new(SimulationPipeline::new(
        http.clone(),
        settings.coordinator_address,
        settings.from_address,
        prover,
        settings.link_native_feed,
    ));

    let stats = Arc::new(VrfStats::default());
    let metrics_port = cli.metrics_port.unwrap_or(settings.metrics_port);
    spawn_metrics_server(metrics_port, stats.clone()).await;

    let job_cfg = VrfJobConfig {
        from_address: settings.from_address,
        min_incoming_confirmations: settings.min_incoming_confirmations,
        job_confirmations: settings.job_confirmations,
        outgoing_confirmations: settings.outgoing_confirmations,
        max_gas_price_wei: settings.max_gas_price_wei(),
        tick_interval: Duration::from_millis(settings.tick_interval_ms),
    };

    let listener = Arc::new(VrfListener::new(
        job_cfg,
        db.clone(),
        TxManager::new(),
        chain,
        coordinator.clone(),
        pipeline,
        stats.clone(),
        Arc::new(Mailbox::new(settings.mailbox_capacity)),
    ));
    listener.clone().start().await?;

    let broadcaster = LogBroadcaster::new(
        ws,
        http,
        db,
        settings.coordinator_address,
        settings.key_hash,
        settings.log_lookback_blocks,
        listener.mailbox(),
        stats.clone(),
        listener.shutdown_token(),
    );
    let broadcaster_handle = tokio::spawn(broadcaster.run());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::Lifecycle(format!("signal wait failed: {}", e)))?;
    tracing::info!("Shutdown signal received, draining");

    listener.close().await?;
    if let Err(e) = broadcaster_handle.await {
        tracing::error!("Broadcaster task failed to join: {}", e);
    }
    tracing::info!("Stopped cleanly");
    Ok(())
}
