//! The per-chain watermark: the highest block number the scanner has fully
//! processed. Advanced only after a tick commits its events, per spec
//! section 4.4's "advance-only-after-success" rule, and rolled back by the
//! scan loop when a reorg is confirmed.
//!
//! Grounded in the `TradeFetcher`/event-range bookkeeping pattern from the
//! teacher's `shared::event_handling::EventHandler`, here split into its own
//! trait so the in-memory and `sqlx`-backed implementations can share one
//! interface with the scan loop.

use anyhow::Result;
use async_trait::async_trait;
use model::Chain;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// The last fully processed block for `chain`, or `None` if the chain
    /// has never been scanned.
    async fn get(&self, chain: Chain) -> Result<Option<u64>>;

    /// Unconditionally sets the watermark for `chain`. Callers are
    /// responsible for only calling this after the corresponding events have
    /// been durably committed, and for calling it with a value lower than
    /// the current watermark only as part of reorg rollback.
    async fn set(&self, chain: Chain, block: u64) -> Result<()>;

    /// Releases any underlying connection or resource. Called once, after
    /// every chain task has gone idle, during graceful shutdown.
    async fn close(&self) -> Result<()>;
}

/// An in-memory watermark store, used in tests and as a building block for
/// the `sqlx`-backed store's cache.
#[derive(Default)]
pub struct InMemoryWatermarkStore {
    watermarks: Mutex<HashMap<Chain, u64>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, chain: Chain) -> Result<Option<u64>> {
        Ok(self.watermarks.lock().await.get(&chain).copied())
    }

    async fn set(&self, chain: Chain, block: u64) -> Result<()> {
        self.watermarks.lock().await.insert(chain, block);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A `sqlx`/Postgres-backed watermark store, durable across restarts.
pub struct PostgresWatermarkStore {
    pool: sqlx::PgPool,
}

impl PostgresWatermarkStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatermarkStore for PostgresWatermarkStore {
    async fn get(&self, chain: Chain) -> Result<Option<u64>> {
        let chain_name = chain.to_string();
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT block_number FROM chain_watermarks WHERE chain = $1")
                .bind(&chain_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(block,)| block as u64))
    }

    async fn set(&self, chain: Chain, block: u64) -> Result<()> {
        let chain_name = chain.to_string();
        sqlx::query(
            "INSERT INTO chain_watermarks (chain, block_number) VALUES ($1, $2) \
             ON CONFLICT (chain) DO UPDATE SET block_number = EXCLUDED.block_number",
        )
        .bind(&chain_name)
        .bind(block as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
