use anyhow::{Context as _, Result};
use model::chain::parse_chain_config_entry;
use shared::{
    arguments,
    block_info::Web3BlockInfoBackend,
    ledger::{LedgerSink, PostgresLedgerSink},
    log_fetcher::Web3LogFetchBackend,
    metrics::{get_metric_storage_registry, serve_metrics, ScannerMetrics},
    scan_loop::{ChainScanner, ScanConfig},
    watermark::{PostgresWatermarkStore, WatermarkStore},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Arguments {
    #[structopt(flatten)]
    shared: arguments::Arguments,

    /// Address to serve Prometheus metrics on.
    #[structopt(long, env = "METRICS_ADDRESS", default_value = "0.0.0.0:9090")]
    metrics_address: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arguments::from_args();
    shared::tracing::initialize(args.shared.log_filter.as_str());
    tracing::info!("starting position scanner with {:#?}", args);

    let _ = ScannerMetrics::instance();
    serve_metrics(get_metric_storage_registry().clone(), args.metrics_address);

    let pool = sqlx::PgPool::connect_lazy(args.shared.database_url.as_str())
        .context("failed to build database pool")?;

    let ledger: Arc<dyn LedgerSink> = Arc::new(PostgresLedgerSink::new(pool.clone()));
    let watermark_store: Arc<dyn WatermarkStore> = Arc::new(PostgresWatermarkStore::new(pool));

    let scan_config = ScanConfig {
        window_blocks: args.shared.window_blocks,
        safety_buffer: args.shared.safety_buffer,
        chunk_min: args.shared.chunk_min,
        chunk_max: args.shared.chunk_max,
        target_logs_per_call: args.shared.target_logs_per_call,
    };

    let chain_configs = args
        .shared
        .scan_chains_config
        .iter()
        .map(|entry| parse_chain_config_entry(entry))
        .collect::<Result<Vec<_>>>()
        .context("failed to parse SCAN_CHAINS_CONFIG")?;
    anyhow::ensure!(!chain_configs.is_empty(), "no chains configured to scan");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut tasks = Vec::new();
    for (chain, config) in chain_configs {
        let transport = web3::transports::Http::new(&config.rpc_url)
            .with_context(|| format!("invalid rpc url for {}", chain))?;
        let web3 = web3::Web3::new(transport);
        let log_backend = Arc::new(Web3LogFetchBackend::new(web3.clone()));
        let block_backend = Arc::new(Web3BlockInfoBackend::new(web3));

        let scanner = Arc::new(ChainScanner::new(
            chain,
            config,
            scan_config,
            log_backend,
            block_backend,
            ledger.clone(),
            watermark_store.clone(),
        ));

        let poll_interval = args.shared.poll_interval;
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::task::spawn(run_chain(
            chain,
            scanner,
            poll_interval,
            shutdown,
        )));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("received shutdown signal, waiting for chain tasks to go idle");
    let _ = shutdown_tx.send(true);

    futures::future::join_all(tasks).await;

    watermark_store
        .close()
        .await
        .context("failed to close watermark store")?;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn run_chain(
    chain: model::Chain,
    scanner: Arc<ChainScanner>,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        match scanner.tick().await {
            Ok(outcome) => log_tick_outcome(chain, &outcome),
            Err(err) => tracing::error!(%chain, error = ?err, "tick failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => {
                tracing::debug!(%chain, "chain task idle, shutting down");
                return;
            }
        }
    }
}

fn log_tick_outcome(chain: model::Chain, outcome: &shared::scan_loop::TickOutcome) {
    use shared::scan_loop::TickOutcome;
    match outcome {
        TickOutcome::ColdStart { watermark } => {
            tracing::debug!(%chain, watermark, "tick complete: cold start")
        }
        TickOutcome::UpToDate => tracing::debug!(%chain, "tick complete: up to date"),
        TickOutcome::Advanced {
            new_events,
            new_watermark,
        } => {
            tracing::debug!(%chain, new_events, watermark = new_watermark, "tick complete: advanced")
        }
        TickOutcome::RolledBack { rollback_target } => {
            tracing::debug!(%chain, rollback_target, "tick complete: rolled back")
        }
    }
}
