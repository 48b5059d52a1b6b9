//! Wire and domain types for NFPM position-lifecycle events.
//!
//! `RawLog` is what a log-fetch backend hands back; `PositionEvent` is what
//! `shared::event_parser` turns it into; `EventIndex` is the idempotency key
//! the ledger sink keys its inserts on.

use crate::chain::Chain;
use hex_literal::hex;
use primitive_types::{H160, H256, U256};
use std::cmp::Ordering;

/// The three event signatures this scanner understands. Any log whose
/// `topics[0]` doesn't match one of these is ignored entirely (see
/// `shared::event_parser`).
pub const INCREASE_LIQUIDITY_TOPIC: H256 = H256(hex!(
    "930aec6391b94d7d554f18d88115666027195e2e39a75e7b67f074673ee89697"
));
pub const DECREASE_LIQUIDITY_TOPIC: H256 = H256(hex!(
    "96b1051b707226d45041b7ed91fc500d3e1914bba0633754f1cfbe48c653acb0"
));
pub const COLLECT_TOPIC: H256 = H256(hex!(
    "758955cc976d0fafa2bcb129546ff55d3e9a12a9b3f2eb4fad047746241c843f"
));

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EventKind {
    IncreaseLiquidity,
    DecreaseLiquidity,
    Collect,
}

impl EventKind {
    /// Maps a log's `topics[0]` to its event kind, if it is one of the three
    /// topics this scanner tracks.
    pub fn from_topic0(topic0: H256) -> Option<Self> {
        match topic0 {
            t if t == INCREASE_LIQUIDITY_TOPIC => Some(Self::IncreaseLiquidity),
            t if t == DECREASE_LIQUIDITY_TOPIC => Some(Self::DecreaseLiquidity),
            t if t == COLLECT_TOPIC => Some(Self::Collect),
            _ => None,
        }
    }
}

/// A log as returned by the fetch backend, before any interpretation of its
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub chain: Chain,
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_hash: H256,
    pub transaction_index: u32,
    pub log_index: u32,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// The total order on logs within a chain: `(blockNumber, transactionIndex,
/// logIndex)`, compared as unsigned integers. No two logs on a chain ever
/// compare equal under this key.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct OrderKey {
    pub block_number: u64,
    pub transaction_index: u32,
    pub log_index: u32,
}

impl From<&RawLog> for OrderKey {
    fn from(log: &RawLog) -> Self {
        Self {
            block_number: log.block_number,
            transaction_index: log.transaction_index,
            log_index: log.log_index,
        }
    }
}

/// The idempotency key the ledger sink keys its inserts on:
/// `(chain, transactionHash, logIndex)`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct EventIndex {
    pub chain: Chain,
    pub transaction_hash: H256,
    pub log_index: u32,
}

impl From<&RawLog> for EventIndex {
    fn from(log: &RawLog) -> Self {
        Self {
            chain: log.chain,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

/// The decoded, typed payload of a position-lifecycle event, plus the
/// provenance needed to place it in the canonical order and to roll it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionEvent {
    pub kind: EventKind,
    pub token_id: U256,
    pub liquidity: Option<U256>,
    pub amount0: Option<U256>,
    pub amount1: Option<U256>,
    pub recipient: Option<H160>,
    pub chain: Chain,
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_hash: H256,
    pub transaction_index: u32,
    pub log_index: u32,
}

impl PositionEvent {
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }

    pub fn event_index(&self) -> EventIndex {
        EventIndex {
            chain: self.chain,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

/// What actually gets handed to the ledger sink: the decoded event alongside
/// its idempotency key, mirroring how the teacher pairs `EventIndex` with a
/// database-ready event enum before calling `insert_events`/`replace_events`.
pub type LedgerEntry = (EventIndex, PositionEvent);

impl PartialOrd for PositionEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PositionEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_lookup() {
        assert_eq!(
            EventKind::from_topic0(INCREASE_LIQUIDITY_TOPIC),
            Some(EventKind::IncreaseLiquidity)
        );
        assert_eq!(
            EventKind::from_topic0(DECREASE_LIQUIDITY_TOPIC),
            Some(EventKind::DecreaseLiquidity)
        );
        assert_eq!(EventKind::from_topic0(COLLECT_TOPIC), Some(EventKind::Collect));
        assert_eq!(EventKind::from_topic0(H256::zero()), None);
    }

    #[test]
    fn order_key_orders_by_block_then_tx_then_log() {
        let a = OrderKey {
            block_number: 1,
            transaction_index: 5,
            log_index: 0,
        };
        let b = OrderKey {
            block_number: 1,
            transaction_index: 5,
            log_index: 1,
        };
        let c = OrderKey {
            block_number: 2,
            transaction_index: 0,
            log_index: 0,
        };
        assert!(a < b);
        assert!(b < c);
    }
}
