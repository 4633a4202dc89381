// SPDX-License-Identifier: MIT
// Shared harness for the listener integration tests: mock chain, coordinator
// and pipeline over a real in-memory database, plus builders that produce
// coordinator logs through the real ABI encoding.
#![allow(dead_code)]

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::rpc::types::Log;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vrf_fulfiller::common::error::AppError;
use vrf_fulfiller::core::mailbox::Mailbox;
use vrf_fulfiller::core::request::{DecodedEvent, LogEnvelope, RandomWordsRequested};
use vrf_fulfiller::data::db::Database;
use vrf_fulfiller::data::txm::TxManager;
use vrf_fulfiller::network::coordinator::{
    ChainHead, CoordinatorApi, VRFCoordinatorV2, parse_random_words_fulfilled,
    parse_random_words_requested,
};
use vrf_fulfiller::services::vrf::pipeline::{FulfillmentPipeline, SimulatedRun};
use vrf_fulfiller::services::vrf::stats::VrfStats;
use vrf_fulfiller::services::vrf::{VrfJobConfig, VrfListener};

pub const COORDINATOR: Address = Address::with_last_byte(0xC0);
pub const FROM: Address = Address::with_last_byte(0xF1);
pub const KEY_HASH: B256 = B256::with_last_byte(0xAB);

pub struct MockChain {
    pub tip: AtomicU64,
}

#[async_trait]
impl ChainHead for MockChain {
    async fn latest_block_number(&self) -> Result<u64, AppError> {
        Ok(self.tip.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
pub struct MockCoordinator {
    pub balances: Mutex<HashMap<u64, U256>>,
    pub commitments: Mutex<HashMap<U256, B256>>,
    /// Subscriptions whose balance reads error out.
    pub unreadable_subs: Mutex<HashSet<u64>>,
}

#[async_trait]
impl CoordinatorApi for MockCoordinator {
    fn address(&self) -> Address {
        COORDINATOR
    }

    async fn subscription_balance(&self, sub_id: u64) -> Result<U256, AppError> {
        if self.unreadable_subs.lock().unwrap().contains(&sub_id) {
            return Err(AppError::Chain("balance read refused".into()));
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&sub_id)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn commitment(&self, request_id: U256) -> Result<B256, AppError> {
        // Unknown requests look unfulfilled (non-zero commitment).
        Ok(self
            .commitments
            .lock()
            .unwrap()
            .get(&request_id)
            .copied()
            .unwrap_or(B256::with_last_byte(1)))
    }

    fn parse_random_words_requested(&self, raw: &Log) -> Result<RandomWordsRequested, AppError> {
        parse_random_words_requested(raw)
    }
}

#[derive(Default)]
pub struct MockPipeline {
    /// max_link per request ID; unknown IDs cost 1.
    pub costs: Mutex<HashMap<U256, U256>>,
    pub failing: Mutex<HashSet<U256>>,
    /// Request IDs in the order they were offered to the simulator.
    pub calls: Mutex<Vec<U256>>,
}

#[async_trait]
impl FulfillmentPipeline for MockPipeline {
    async fn simulate(
        &self,
        req: &RandomWordsRequested,
        _max_gas_price_wei: U256,
    ) -> Result<SimulatedRun, AppError> {
        self.calls.lock().unwrap().push(req.request_id);
        if self.failing.lock().unwrap().contains(&req.request_id) {
            return Err(AppError::Simulation("transient pipeline failure".into()));
        }
        let max_link = self
            .costs
            .lock()
            .unwrap()
            .get(&req.request_id)
            .copied()
            .unwrap_or(U256::from(1u64));
        Ok(SimulatedRun {
            max_link,
            payload: Bytes::from(vec![0xab, 0xcd]),
            gas_limit: 500_000,
        })
    }
}

pub struct Harness {
    pub listener: Arc<VrfListener>,
    pub db: Database,
    pub chain: Arc<MockChain>,
    pub coordinator: Arc<MockCoordinator>,
    pub pipeline: Arc<MockPipeline>,
    pub stats: Arc<VrfStats>,
}

impl Harness {
    pub async fn new(base_confs: u64) -> Self {
        let db = Database::new("sqlite::memory:").await.expect("db");
        let chain = Arc::new(MockChain {
            tip: AtomicU64::new(0),
        });
        let coordinator = Arc::new(MockCoordinator::default());
        let pipeline = Arc::new(MockPipeline::default());
        let stats = Arc::new(VrfStats::default());
        let listener = Arc::new(VrfListener::new(
            VrfJobConfig {
                from_address: FROM,
                min_incoming_confirmations: base_confs,
                job_confirmations: 0,
                outgoing_confirmations: 12,
                max_gas_price_wei: U256::from(1_000_000_000u64),
                tick_interval: Duration::from_secs(2),
            },
            db.clone(),
            TxManager::new(),
            chain.clone(),
            coordinator.clone(),
            pipeline.clone(),
            stats.clone(),
            Arc::new(Mailbox::high_capacity()),
        ));
        Self {
            listener,
            db,
            chain,
            coordinator,
            pipeline,
            stats,
        }
    }

    pub fn set_tip(&self, tip: u64) {
        self.chain.tip.store(tip, Ordering::Relaxed);
    }

    pub fn set_balance(&self, sub_id: u64, balance: u64) {
        self.coordinator
            .balances
            .lock()
            .unwrap()
            .insert(sub_id, U256::from(balance));
    }

    pub fn set_cost(&self, request_id: u64, cost: u64) {
        self.pipeline
            .costs
            .lock()
            .unwrap()
            .insert(U256::from(request_id), U256::from(cost));
    }

    pub async fn eth_tx_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM eth_txes")
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }

    pub async fn simulated_ids(&self) -> Vec<u64> {
        self.pipeline
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.to::<u64>())
            .collect()
    }
}

/// Raw provenance shared by the log builders. Each distinct log needs its own
/// (block_hash, log_index) pair or it will be treated as a redelivery.
fn wrap_log(data: alloy::primitives::LogData, block_number: u64, log_index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: COORDINATOR,
            data,
        },
        block_hash: Some(B256::with_last_byte((log_index as u8).wrapping_add(1))),
        block_number: Some(block_number),
        transaction_hash: Some(B256::with_last_byte(0x77)),
        log_index: Some(log_index),
        ..Default::default()
    }
}

pub fn requested_log(request_id: u64, sub_id: u64, block_number: u64, log_index: u64) -> Log {
    let ev = VRFCoordinatorV2::RandomWordsRequested {
        keyHash: KEY_HASH,
        requestId: U256::from(request_id),
        preSeed: U256::from(42u64),
        subId: sub_id,
        minimumRequestConfirmations: 3,
        callbackGasLimit: 100_000,
        numWords: 1,
        sender: Address::with_last_byte(0x99),
    };
    wrap_log(ev.encode_log_data(), block_number, log_index)
}

pub fn requested_envelope(request_id: u64, sub_id: u64, block_number: u64, log_index: u64) -> LogEnvelope {
    let raw = requested_log(request_id, sub_id, block_number, log_index);
    let decoded = parse_random_words_requested(&raw).expect("round-trip decode");
    LogEnvelope {
        decoded: Some(DecodedEvent::Requested(decoded)),
        raw,
    }
}

pub fn fulfilled_envelope(request_id: u64, block_number: u64, log_index: u64) -> LogEnvelope {
    let ev = VRFCoordinatorV2::RandomWordsFulfilled {
        requestId: U256::from(request_id),
        outputSeed: U256::from(7u64),
        payment: alloy::primitives::aliases::U96::from(1u64),
        success: true,
    };
    let raw = wrap_log(ev.encode_log_data(), block_number, log_index);
    let decoded = parse_random_words_fulfilled(&raw).expect("round-trip decode");
    LogEnvelope {
        decoded: Some(DecodedEvent::Fulfilled(decoded)),
        raw,
    }
}

/// A log that matches no known event shape.
pub fn garbage_envelope(block_number: u64, log_index: u64) -> LogEnvelope {
    let data = alloy::primitives::LogData::new_unchecked(
        vec![VRFCoordinatorV2::RandomWordsRequested::SIGNATURE_HASH],
        Bytes::from(vec![0x01, 0x02]),
    );
    LogEnvelope {
        decoded: None,
        raw: wrap_log(data, block_number, log_index),
    }
}
