// SPDX-License-Identifier: MIT

use alloy::primitives::U256;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Confirmation-depth cap. The contract can only verify the most recent 256
/// blockhashes, so depths beyond that would make fulfillments fail; 200
/// leaves plenty of time to fulfill even on fast chains.
pub const CONFIRMATION_CAP: u64 = 200;

/// Fulfilled markers older than this many blocks are purged.
pub const PRUNE_AGE_BLOCKS: u64 = 10_000;

/// Ordered by `block_number` first so the heap pops oldest markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FulfilledMarker {
    block_number: u64,
    request_id: U256,
}

/// Tracks how many fulfillment logs have been observed per request ID.
///
/// A duplicate request seen after k fulfillments gets its confirmation depth
/// multiplied by 2^k, which makes reorg-driven double-spend attempts wait
/// long enough to be distinguishable from honest re-requests. The count map
/// gives O(1) updates per fulfillment log; the min-heap exists so pruning can
/// repeatedly remove the oldest marker even when logs arrive out of order.
#[derive(Debug, Default)]
pub struct ReorgTracker {
    resp_count: HashMap<U256, u64>,
    by_block: BinaryHeap<Reverse<FulfilledMarker>>,
}

impl ReorgTracker {
    pub fn observe(&mut self, request_id: U256, block_number: u64) -> u64 {
        let count = self.resp_count.entry(request_id).or_insert(0);
        *count += 1;
        self.by_block.push(Reverse(FulfilledMarker {
            block_number,
            request_id,
        }));
        *count
    }

    pub fn fulfillment_count(&self, request_id: U256) -> u64 {
        self.resp_count.get(&request_id).copied().unwrap_or(0)
    }

    /// `min(200, base_confs * 2^count)` for the given request.
    pub fn confs_factor(&self, request_id: U256, base_confs: u64) -> u64 {
        let count = self.fulfillment_count(request_id);
        let confs = match 1u64.checked_shl(count as u32) {
            Some(factor) => base_confs.saturating_mul(factor),
            None => u64::MAX,
        };
        confs.min(CONFIRMATION_CAP)
    }

    /// Remove every marker at least [`PRUNE_AGE_BLOCKS`] old, along with its
    /// response count.
    pub fn prune(&mut self, tip: u64) {
        let cutoff = tip.saturating_sub(PRUNE_AGE_BLOCKS);
        while let Some(Reverse(oldest)) = self.by_block.peek().copied() {
            if oldest.block_number > cutoff {
                break;
            }
            self.resp_count.remove(&oldest.request_id);
            self.by_block.pop();
        }
    }

    #[cfg(test)]
    fn heap_ids(&self) -> Vec<U256> {
        self.by_block.iter().map(|Reverse(m)| m.request_id).collect()
    }
}
