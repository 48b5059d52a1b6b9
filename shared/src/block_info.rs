//! Block-head queries backing the scan loop's pruning boundary: the scan
//! loop always forward-syncs to `latest` (spec section 4.5.1); this module
//! instead computes the *recent window's* prune boundary, which prefers the
//! `finalized`/`safe` tags over `latest - WINDOW_BLOCKS` only in the sense
//! that it never prunes past whichever of the two is more conservative
//! (section 4.3: `boundary = max(finalizedOrSafe, latest - W)`).
//!
//! Grounded in `shared::current_block::current_block`, which calls
//! `web3.eth().block(BlockId::Number(...))` directly against the node rather
//! than going through generated contract bindings.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use web3::{
    types::{BlockId, BlockNumber},
    Transport, Web3,
};

/// What C1 needs to know about the chain head to pick a safe upper scan
/// bound.
#[async_trait]
pub trait BlockInfoBackend: Send + Sync {
    /// The chain's latest block number.
    async fn latest_block_number(&self) -> Result<u64>;

    /// The `finalized` block number, if the endpoint understands the tag.
    async fn finalized_block_number(&self) -> Result<Option<u64>>;

    /// The `safe` block number, if the endpoint understands the tag.
    async fn safe_block_number(&self) -> Result<Option<u64>>;
}

/// Computes the recent window's prune boundary: `max(finalizedOrSafe,
/// latest - window_blocks)`, clamped at zero. `latest` is passed in rather
/// than fetched here since the caller already needs it to pick the scan's
/// upper bound (which is `latest` itself, not this boundary).
pub async fn prune_boundary(
    backend: &dyn BlockInfoBackend,
    supports_finalized: bool,
    window_blocks: u64,
    latest: u64,
) -> Result<u64> {
    let window_floor = latest.saturating_sub(window_blocks);
    if !supports_finalized {
        return Ok(window_floor);
    }
    let finalized_or_safe = match backend.finalized_block_number().await? {
        Some(finalized) => Some(finalized),
        None => backend.safe_block_number().await?,
    };
    Ok(match finalized_or_safe {
        Some(value) => value.max(window_floor),
        None => window_floor,
    })
}

pub struct Web3BlockInfoBackend<T: Transport> {
    web3: Web3<T>,
}

impl<T: Transport> Web3BlockInfoBackend<T> {
    pub fn new(web3: Web3<T>) -> Self {
        Self { web3 }
    }

    async fn tagged_block_number(&self, tag: BlockNumber) -> Result<Option<u64>> {
        let block = self
            .web3
            .eth()
            .block(BlockId::Number(tag))
            .await
            .with_context(|| format!("failed to fetch {:?} block", tag))?;
        Ok(block.and_then(|b| b.number).map(|n| n.as_u64()))
    }
}

#[async_trait]
impl<T> BlockInfoBackend for Web3BlockInfoBackend<T>
where
    T: Transport + Send + Sync,
    T::Out: Send,
{
    async fn latest_block_number(&self) -> Result<u64> {
        self.tagged_block_number(BlockNumber::Latest)
            .await?
            .context("node returned no latest block")
    }

    async fn finalized_block_number(&self) -> Result<Option<u64>> {
        // Nodes that don't understand `finalized` return an RPC error; treat
        // that the same as "tag unsupported" rather than a fatal error.
        match self.tagged_block_number(BlockNumber::Finalized).await {
            Ok(block) => Ok(block),
            Err(_) => Ok(None),
        }
    }

    async fn safe_block_number(&self) -> Result<Option<u64>> {
        match self.tagged_block_number(BlockNumber::Safe).await {
            Ok(block) => Ok(block),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeBackend {
        latest: u64,
        finalized: Option<u64>,
        safe: Option<u64>,
    }

    #[async_trait]
    impl BlockInfoBackend for FakeBackend {
        async fn latest_block_number(&self) -> Result<u64> {
            Ok(self.latest)
        }
        async fn finalized_block_number(&self) -> Result<Option<u64>> {
            Ok(self.finalized)
        }
        async fn safe_block_number(&self) -> Result<Option<u64>> {
            Ok(self.safe)
        }
    }

    #[tokio::test]
    async fn boundary_prefers_finalized_when_it_is_more_conservative() {
        let backend = FakeBackend {
            latest: 100,
            finalized: Some(70),
            safe: Some(95),
        };
        // window_floor = 100 - 10 = 90, which is more conservative than finalized (70).
        let boundary = prune_boundary(&backend, true, 10, backend.latest).await.unwrap();
        assert_eq!(boundary, 90);
    }

    #[tokio::test]
    async fn boundary_prefers_window_floor_when_it_is_more_conservative() {
        let backend = FakeBackend {
            latest: 100,
            finalized: Some(95),
            safe: Some(95),
        };
        // window_floor = 100 - 10 = 90, finalized (95) is more conservative here.
        let boundary = prune_boundary(&backend, true, 10, backend.latest).await.unwrap();
        assert_eq!(boundary, 95);
    }

    #[tokio::test]
    async fn boundary_falls_back_to_safe_when_finalized_missing() {
        let backend = FakeBackend {
            latest: 100,
            finalized: None,
            safe: Some(99),
        };
        let boundary = prune_boundary(&backend, true, 10, backend.latest).await.unwrap();
        assert_eq!(boundary, 99);
    }

    #[tokio::test]
    async fn boundary_ignores_tags_when_unsupported() {
        let backend = FakeBackend {
            latest: 100,
            finalized: Some(99),
            safe: Some(99),
        };
        let boundary = prune_boundary(&backend, false, 10, backend.latest).await.unwrap();
        assert_eq!(boundary, 90);
    }

    #[tokio::test]
    async fn boundary_clamps_at_zero() {
        let backend = FakeBackend {
            latest: 5,
            finalized: None,
            safe: None,
        };
        let boundary = prune_boundary(&backend, true, 10, backend.latest).await.unwrap();
        assert_eq!(boundary, 0);
    }
}
