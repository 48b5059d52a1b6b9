//! C3 Recent Transaction Window: an in-memory, first-seen-wins record of the
//! most recently observed logs, used to detect reorgs by diffing a fresh
//! re-fetch of the same block range against what was first observed there.
//!
//! Grounded in the `BlockRetriever`/reorg handling of the teacher's
//! `shared::event_handling::EventHandler`, which keeps a `last_handled_block`
//! and re-derives state from a stored range rather than trusting a single
//! linear watermark; here that notion is generalized into an explicit
//! per-transaction window so later components (the scan loop) can diff
//! instead of merely re-deriving.

use model::EventIndex;
use primitive_types::H256;
use std::collections::BTreeMap;

/// What the window remembers about a transaction's logs the first time they
/// were observed: which block (hash + number) they landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstSeen {
    pub block_number: u64,
    pub block_hash: H256,
}

/// A bounded, first-seen-wins window over recently observed logs, keyed by
/// `(tx_hash, log_index)`. Ordered by block number so pruning and
/// range-scans are cheap.
#[derive(Debug, Default)]
pub struct RecentWindow {
    // block_number -> (tx_hash, log_index) -> first-seen record.
    by_block: BTreeMap<u64, Vec<(EventIndex, FirstSeen)>>,
}

impl RecentWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a log's first observation. If `(tx_hash, log_index)` is
    /// already present under the same block, this is a no-op: the window is
    /// first-seen-wins and never overwrites an existing entry with a
    /// re-fetch of the same data.
    pub fn upsert(&mut self, index: EventIndex, seen: FirstSeen) {
        let bucket = self.by_block.entry(seen.block_number).or_default();
        if !bucket.iter().any(|(i, _)| *i == index) {
            bucket.push((index, seen));
        }
    }

    /// Drops all entries with `block_number < boundary`. After this call,
    /// every remaining entry satisfies `block_number >= boundary`.
    pub fn prune(&mut self, boundary: u64) {
        self.by_block = self.by_block.split_off(&boundary);
    }

    /// Removes all entries with `block_number > block`, used to roll the
    /// window back to a safe ancestor when a reorg is confirmed.
    pub fn remove_above(&mut self, block: u64) {
        self.by_block.split_off(&(block + 1));
    }

    /// Returns the first-seen record for every entry in `[from, to]`,
    /// ordered by block number then insertion order, for diffing against a
    /// fresh re-fetch of the same range.
    pub fn entries_in_range(&self, from: u64, to: u64) -> Vec<(EventIndex, FirstSeen)> {
        self.by_block
            .range(from..=to)
            .flat_map(|(_, bucket)| bucket.iter().cloned())
            .collect()
    }

    pub fn lowest_block(&self) -> Option<u64> {
        self.by_block.keys().next().copied()
    }

    pub fn highest_block(&self) -> Option<u64> {
        self.by_block.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.by_block.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
