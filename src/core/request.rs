// SPDX-License-Identifier: MIT

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::rpc::types::Log;
use std::collections::{BTreeMap, HashSet};

/// Provenance of the raw on-chain log an event was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogMeta {
    pub block_hash: B256,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl RawLogMeta {
    /// Extract provenance from an rpc log. Pending logs are missing block
    /// metadata and are rejected; the broadcaster only delivers mined logs.
    pub fn from_log(log: &Log) -> Option<Self> {
        Some(Self {
            block_hash: log.block_hash?,
            block_number: log.block_number?,
            tx_hash: log.transaction_hash?,
            log_index: log.log_index?,
            topics: log.inner.topics().to_vec(),
            data: log.inner.data.data.clone(),
        })
    }

    /// Key under which the log's consumed marker is stored.
    pub fn consumed_key(&self) -> (B256, u64) {
        (self.block_hash, self.log_index)
    }
}

/// Decoded `RandomWordsRequested` coordinator event.
#[derive(Debug, Clone)]
pub struct RandomWordsRequested {
    pub key_hash: B256,
    pub request_id: U256,
    pub pre_seed: U256,
    pub sub_id: u64,
    pub minimum_request_confirmations: u16,
    pub callback_gas_limit: u32,
    pub num_words: u32,
    pub sender: Address,
    pub raw: RawLogMeta,
}

/// Decoded `RandomWordsFulfilled` coordinator event.
#[derive(Debug, Clone)]
pub struct RandomWordsFulfilled {
    pub request_id: U256,
    pub success: bool,
    pub raw: RawLogMeta,
}

#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Requested(RandomWordsRequested),
    Fulfilled(RandomWordsFulfilled),
}

/// A broadcast as delivered through the mailbox: the broadcaster's decode
/// attempt plus the raw log, which the router re-parses when the decode is
/// absent.
#[derive(Debug, Clone)]
pub struct LogEnvelope {
    pub decoded: Option<DecodedEvent>,
    pub raw: Log,
}

impl LogEnvelope {
    pub fn consumed_key(&self) -> Option<(B256, u64)> {
        Some((self.raw.block_hash?, self.raw.log_index?))
    }
}

/// A request waiting out its confirmation depth.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub confirmed_at_block: u64,
    pub req: RandomWordsRequested,
}

/// In-memory table of requests awaiting eligibility and dispatch, kept in
/// log arrival order. These can live in memory because a log is only marked
/// consumed once its fulfillment transaction is recorded; on restart the
/// broadcaster re-delivers everything unconsumed.
#[derive(Debug, Default)]
pub struct PendingSet {
    reqs: Vec<PendingRequest>,
}

impl PendingSet {
    pub fn push(&mut self, req: PendingRequest) {
        self.reqs.push(req);
    }

    /// All requests whose confirmation block has been reached, grouped by
    /// subscription, preserving insertion order within each group.
    pub fn confirmed_by_sub(&self, tip: u64) -> BTreeMap<u64, Vec<PendingRequest>> {
        let mut by_sub: BTreeMap<u64, Vec<PendingRequest>> = BTreeMap::new();
        for pending in &self.reqs {
            if pending.confirmed_at_block <= tip {
                by_sub
                    .entry(pending.req.sub_id)
                    .or_default()
                    .push(pending.clone());
            }
        }
        by_sub
    }

    /// Post-pass compaction: drop every request whose ID was processed.
    pub fn remove_processed(&mut self, processed: &HashSet<U256>) {
        self.reqs
            .retain(|pending| !processed.contains(&pending.req.request_id));
    }

    pub fn request_ids(&self) -> Vec<U256> {
        self.reqs.iter().map(|p| p.req.request_id).collect()
    }

    pub fn len(&self) -> usize {
        self.reqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reqs.is_empty()
    }
}
