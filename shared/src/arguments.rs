//! Contains command line arguments and related helpers shared between the
//! scanner binary and its tests.

use anyhow::{Context as _, Result};
use std::time::Duration;
use structopt::StructOpt;
use url::Url;

#[derive(Debug, StructOpt)]
pub struct Arguments {
    #[structopt(
        long,
        env = "LOG_FILTER",
        default_value = "warn,position_scanner=debug,shared=debug"
    )]
    pub log_filter: String,

    /// Postgres connection string for the ledger and watermark stores.
    #[structopt(long, env = "DATABASE_URL")]
    pub database_url: Url,

    /// Which chains to scan. Each entry is a `chain=address,rpc_url,supports_finalized`
    /// tuple as parsed by `model::chain::parse_chain_config_entry`.
    #[structopt(long, env = "SCAN_CHAINS_CONFIG", use_delimiter = true, value_delimiter = ";")]
    pub scan_chains_config: Vec<String>,

    /// How long to sleep between ticks of a chain's scan loop once it has
    /// caught up to its safe head.
    #[structopt(long, env, default_value = "5000", parse(try_from_str = duration_from_millis))]
    pub poll_interval: Duration,

    /// How many blocks behind the chain head the recent-transaction window
    /// reaches back, and how far behind `latest` to scan when the node
    /// doesn't support the `finalized`/`safe` tags.
    #[structopt(long, env, default_value = "256")]
    pub window_blocks: u64,

    /// Extra blocks below the lowest affected block to roll back to when a
    /// reorg is confirmed, to absorb uncertainty in exactly where the chains
    /// diverged.
    #[structopt(long, env, default_value = "12")]
    pub safety_buffer: u64,

    /// The smallest span the adaptive log fetcher will shrink to before
    /// giving up and surfacing a fatal error.
    #[structopt(long, env, default_value = "1")]
    pub chunk_min: u64,

    /// The largest span the adaptive log fetcher will use for a single
    /// `eth_getLogs` call.
    #[structopt(long, env, default_value = "5000")]
    pub chunk_max: u64,

    /// The number of logs per call the adaptive fetcher aims for when
    /// growing or shrinking its span.
    #[structopt(long, env, default_value = "200")]
    pub target_logs_per_call: u64,
}

fn duration_from_millis(s: &str) -> Result<Duration> {
    let millis: u64 = s.parse().context("invalid duration")?;
    Ok(Duration::from_millis(millis))
}
