//! C5 Scan Loop: the per-chain tick state machine tying the log fetcher,
//! event parser, recent window and ledger/watermark stores together, and
//! the reorg controller that rolls all of them back in lockstep when the
//! recent window's first-seen record disagrees with a fresh re-fetch.
//!
//! Grounded in the teacher's `shared::maintenance::ServiceMaintenance`
//! (fan out over independent components, log and continue past individual
//! failures) and `shared::event_handling::EventHandler::update_events`
//! (only advance the watermark after the corresponding events are durably
//! committed).

use crate::{
    block_info::{prune_boundary, BlockInfoBackend},
    ledger::{AppendOutcome, LedgerSink},
    log_fetcher::{fetch_range, AdaptiveSpan, LogFetchBackend},
    recent_window::{FirstSeen, RecentWindow},
    watermark::WatermarkStore,
};
use anyhow::{Context as _, Result};
use model::{
    Chain, ChainConfig, EventIndex, COLLECT_TOPIC, DECREASE_LIQUIDITY_TOPIC,
    INCREASE_LIQUIDITY_TOPIC,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Static knobs governing the scan loop, shared across all chains.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    pub window_blocks: u64,
    pub safety_buffer: u64,
    pub chunk_min: u64,
    pub chunk_max: u64,
    pub target_logs_per_call: u64,
}

/// What a single tick did, for logging and metrics.
#[derive(Debug)]
pub enum TickOutcome {
    /// The chain had no persisted watermark; it was initialized to the
    /// current head with no backfill (spec section 4.5.1 step 1, scenario A).
    ColdStart { watermark: u64 },
    /// No new blocks to scan past the current watermark.
    UpToDate,
    /// Ingested `new_events` new events up to `new_watermark`.
    Advanced { new_events: usize, new_watermark: u64 },
    /// A reorg was detected and rolled back to `rollback_target`.
    RolledBack { rollback_target: u64 },
}

/// One chain's scan state: its backends, stores, and the in-memory recent
/// window. Cheaply clonable so the scan loop can be driven from a
/// `tokio::select!` alongside a shutdown signal.
pub struct ChainScanner {
    chain: Chain,
    config: ChainConfig,
    scan_config: ScanConfig,
    log_backend: Arc<dyn LogFetchBackend>,
    block_backend: Arc<dyn BlockInfoBackend>,
    ledger: Arc<dyn LedgerSink>,
    watermark_store: Arc<dyn WatermarkStore>,
    window: Mutex<RecentWindow>,
    span: Mutex<AdaptiveSpan>,
}

impl ChainScanner {
    pub fn new(
        chain: Chain,
        config: ChainConfig,
        scan_config: ScanConfig,
        log_backend: Arc<dyn LogFetchBackend>,
        block_backend: Arc<dyn BlockInfoBackend>,
        ledger: Arc<dyn LedgerSink>,
        watermark_store: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            chain,
            config,
            scan_config,
            log_backend,
            block_backend,
            ledger,
            watermark_store,
            window: Mutex::new(RecentWindow::new()),
            span: Mutex::new(AdaptiveSpan::new(
                scan_config.chunk_min,
                scan_config.chunk_max,
                scan_config.target_logs_per_call,
            )),
        }
    }

    fn topics(&self) -> [primitive_types::H256; 3] {
        [
            INCREASE_LIQUIDITY_TOPIC,
            DECREASE_LIQUIDITY_TOPIC,
            COLLECT_TOPIC,
        ]
    }

    /// Runs one tick of the scan loop: initialize a watermark-less chain
    /// (cold start), detect and roll back reorgs, then ingest any newly
    /// available blocks.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let watermark = match self.watermark_store.get(self.chain).await? {
            Some(watermark) => watermark,
            None => return self.cold_start().await,
        };

        if let Some(rollback_target) = self.detect_reorg(watermark).await? {
            self.roll_back(rollback_target).await?;
            return Ok(TickOutcome::RolledBack { rollback_target });
        }

        let latest = self
            .block_backend
            .latest_block_number()
            .await
            .context("failed to fetch latest block")?;

        if latest <= watermark {
            tracing::debug!(chain = %self.chain, watermark, latest, "tick up to date");
            return Ok(TickOutcome::UpToDate);
        }

        let boundary = prune_boundary(
            self.block_backend.as_ref(),
            self.config.supports_finalized,
            self.scan_config.window_blocks,
            latest,
        )
        .await
        .context("failed to compute prune boundary")?;

        let from = watermark + 1;
        let logs = {
            let mut span = self.span.lock().await;
            fetch_range(
                self.log_backend.as_ref(),
                &mut span,
                self.chain,
                self.config.nfpm_address,
                &self.topics(),
                from,
                latest,
            )
            .await
            .context("failed to fetch new logs")?
        };
        let logs_found = logs.len();

        let mut new_events = 0usize;
        let window_size = {
            let mut window = self.window.lock().await;
            for log in &logs {
                let event = match crate::event_parser::parse_log(log) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(chain = %self.chain, error = %err, "skipping malformed log");
                        continue;
                    }
                };
                let outcome = self.ledger.append_event(&event).await?;
                if matches!(outcome, AppendOutcome::Inserted) {
                    new_events += 1;
                }
                window.upsert(
                    EventIndex::from(log),
                    FirstSeen {
                        block_number: log.block_number,
                        block_hash: log.block_hash,
                    },
                );
            }
            window.prune(boundary);
            window.len()
        };

        // Only advance the watermark once every event in the range has been
        // durably committed, so a crash mid-tick simply re-scans the range
        // on restart instead of silently skipping it.
        self.watermark_store.set(self.chain, latest).await?;

        tracing::info!(
            chain = %self.chain,
            watermark = latest,
            latest,
            window_size,
            logs_found,
            "tick advanced"
        );

        Ok(TickOutcome::Advanced {
            new_events,
            new_watermark: latest,
        })
    }

    /// Initializes a chain with no persisted watermark: sets the watermark
    /// to the current head with an empty window and zero ledger appends,
    /// per spec section 4.5.1 step 1 and scenario A. Archival backfill from
    /// genesis is an explicit non-goal.
    async fn cold_start(&self) -> Result<TickOutcome> {
        let latest = self
            .block_backend
            .latest_block_number()
            .await
            .context("failed to fetch latest block for cold start")?;
        self.watermark_store.set(self.chain, latest).await?;
        tracing::info!(chain = %self.chain, watermark = latest, latest, "cold start");
        Ok(TickOutcome::ColdStart { watermark: latest })
    }

    /// Re-fetches logs over the window's currently tracked range and
    /// compares them against what was first observed there. Returns the
    /// lowest block number at which the comparison disagrees, if any.
    async fn detect_reorg(&self, watermark: u64) -> Result<Option<u64>> {
        let (from, to) = {
            let window = self.window.lock().await;
            match window.lowest_block() {
                Some(lowest) => (lowest, watermark),
                None => return Ok(None),
            }
        };
        if from > to {
            return Ok(None);
        }

        let mut span = AdaptiveSpan::new(
            self.scan_config.chunk_min,
            self.scan_config.chunk_max,
            self.scan_config.target_logs_per_call,
        );
        let fresh_logs = fetch_range(
            self.log_backend.as_ref(),
            &mut span,
            self.chain,
            self.config.nfpm_address,
            &self.topics(),
            from,
            to,
        )
        .await
        .context("failed to re-fetch logs for reorg check")?;

        let window = self.window.lock().await;
        let tracked = window.entries_in_range(from, to);

        let mut min_affected: Option<u64> = None;
        for (index, first_seen) in &tracked {
            let still_present = fresh_logs.iter().any(|log| {
                EventIndex::from(log) == *index && log.block_hash == first_seen.block_hash
            });
            if !still_present {
                min_affected = Some(match min_affected {
                    Some(current) => current.min(first_seen.block_number),
                    None => first_seen.block_number,
                });
            }
        }

        Ok(min_affected.map(|affected| affected.saturating_sub(self.scan_config.safety_buffer)))
    }

    async fn roll_back(&self, rollback_target: u64) -> Result<()> {
        tracing::warn!(chain = %self.chain, rollback_target, "reorg detected, rolling back");
        self.ledger.remove_from(self.chain, rollback_target).await?;
        {
            let mut window = self.window.lock().await;
            window.remove_above(rollback_target.saturating_sub(1));
        }
        let new_watermark = rollback_target.saturating_sub(1);
        self.watermark_store.set(self.chain, new_watermark).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block_info::BlockInfoBackend, ledger::InMemoryLedgerSink, log_fetcher::{FetchError, LogFetchBackend}, watermark::InMemoryWatermarkStore};
    use async_trait::async_trait;
    use ethabi::Token;
    use model::RawLog;
    use primitive_types::{H160, H256, U256};
    use std::sync::Mutex as StdMutex;

    struct FakeBlockBackend {
        latest: StdMutex<u64>,
    }

    #[async_trait]
    impl BlockInfoBackend for FakeBlockBackend {
        async fn latest_block_number(&self) -> Result<u64> {
            Ok(*self.latest.lock().unwrap())
        }
        async fn finalized_block_number(&self) -> Result<Option<u64>> {
            Ok(None)
        }
        async fn safe_block_number(&self) -> Result<Option<u64>> {
            Ok(None)
        }
    }

    struct FakeLogBackend {
        logs: StdMutex<Vec<RawLog>>,
    }

    #[async_trait]
    impl LogFetchBackend for FakeLogBackend {
        async fn fetch_logs(
            &self,
            _chain: Chain,
            _address: H160,
            _topic0: &[H256],
            from: u64,
            to: u64,
        ) -> Result<Vec<RawLog>, FetchError> {
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|log| log.block_number >= from && log.block_number <= to)
                .cloned()
                .collect())
        }
    }

    fn increase_log(block_number: u64, block_hash: u8, tx: u8, token_id: u64) -> RawLog {
        RawLog {
            chain: Chain::Ethereum,
            block_number,
            block_hash: H256::repeat_byte(block_hash),
            transaction_hash: H256::repeat_byte(tx),
            transaction_index: 0,
            log_index: 0,
            topics: vec![INCREASE_LIQUIDITY_TOPIC, H256::from_low_u64_be(token_id)],
            data: ethabi::encode(&[
                Token::Uint(U256::from(1)),
                Token::Uint(U256::from(2)),
                Token::Uint(U256::from(3)),
            ]),
        }
    }

    fn make_scanner(
        logs: Vec<RawLog>,
        latest: u64,
    ) -> (ChainScanner, Arc<InMemoryLedgerSink>, Arc<InMemoryWatermarkStore>, Arc<FakeLogBackend>) {
        let ledger = Arc::new(InMemoryLedgerSink::new());
        let watermark_store = Arc::new(InMemoryWatermarkStore::new());
        let log_backend = Arc::new(FakeLogBackend {
            logs: StdMutex::new(logs),
        });
        let block_backend = Arc::new(FakeBlockBackend {
            latest: StdMutex::new(latest),
        });
        let scanner = ChainScanner::new(
            Chain::Ethereum,
            ChainConfig {
                nfpm_address: H160::zero(),
                rpc_url: "http://localhost".to_string(),
                supports_finalized: false,
            },
            ScanConfig {
                window_blocks: 5,
                safety_buffer: 2,
                chunk_min: 1,
                chunk_max: 1000,
                target_logs_per_call: 100,
            },
            log_backend.clone(),
            block_backend,
            ledger.clone(),
            watermark_store.clone(),
        );
        (scanner, ledger, watermark_store, log_backend)
    }

    #[tokio::test]
    async fn tick_is_up_to_date_with_no_blocks_past_watermark() {
        let (scanner, _, watermark_store, _) = make_scanner(vec![], 0);
        watermark_store.set(Chain::Ethereum, 0).await.unwrap();
        let outcome = scanner.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::UpToDate));
    }

    #[tokio::test]
    async fn tick_cold_starts_to_latest_with_no_appends() {
        let logs = vec![increase_log(10, 0xa, 1, 42)];
        let (scanner, ledger, watermark_store, _) = make_scanner(logs, 20);

        let outcome = scanner.tick().await.unwrap();
        match outcome {
            TickOutcome::ColdStart { watermark } => assert_eq!(watermark, 20),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.events().await.len(), 0);
        assert_eq!(watermark_store.get(Chain::Ethereum).await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn tick_ingests_new_logs_and_advances_watermark() {
        let logs = vec![increase_log(10, 0xa, 1, 42)];
        let (scanner, ledger, watermark_store, _) = make_scanner(logs, 20);
        watermark_store.set(Chain::Ethereum, 5).await.unwrap();

        let outcome = scanner.tick().await.unwrap();
        match outcome {
            TickOutcome::Advanced { new_events, new_watermark } => {
                assert_eq!(new_events, 1);
                assert_eq!(new_watermark, 20);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.events().await.len(), 1);
        assert_eq!(watermark_store.get(Chain::Ethereum).await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn second_tick_with_changed_block_hash_triggers_rollback() {
        let logs = vec![increase_log(10, 0xa, 1, 42)];
        let (scanner, ledger, watermark_store, log_backend) = make_scanner(logs, 20);
        watermark_store.set(Chain::Ethereum, 5).await.unwrap();

        scanner.tick().await.unwrap();
        assert_eq!(ledger.events().await.len(), 1);

        // Simulate a reorg: the same transaction now lands in a different block hash.
        {
            let mut logs = log_backend.logs.lock().unwrap();
            logs[0] = increase_log(10, 0xb, 1, 42);
        }

        let outcome = scanner.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::RolledBack { .. }));
        assert_eq!(ledger.events().await.len(), 0);
        let watermark = watermark_store.get(Chain::Ethereum).await.unwrap().unwrap();
        assert!(watermark < 20);
    }
}
