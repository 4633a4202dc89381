// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use crate::common::retry::READ_RETRY;
use crate::core::request::{RandomWordsFulfilled, RandomWordsRequested, RawLogMeta};
use crate::network::provider::HttpProvider;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::Log;
use alloy::sol;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;

sol! {
    #[sol(rpc)]
    contract VRFCoordinatorV2 {
        event RandomWordsRequested(
            bytes32 indexed keyHash,
            uint256 requestId,
            uint256 preSeed,
            uint64 indexed subId,
            uint16 minimumRequestConfirmations,
            uint32 callbackGasLimit,
            uint32 numWords,
            address indexed sender
        );

        event RandomWordsFulfilled(uint256 indexed requestId, uint256 outputSeed, uint96 payment, bool success);

        function getSubscription(uint64 subId)
            external
            view
            returns (uint96 balance, uint64 reqCount, address owner, address[] memory consumers);

        function getCommitment(uint256 requestId) external view returns (bytes32);
    }
}

/// Block-tip reader.
#[async_trait]
pub trait ChainHead: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, AppError>;
}

/// Reads against the coordinator contract plus raw-log parsing.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    fn address(&self) -> Address;

    async fn subscription_balance(&self, sub_id: u64) -> Result<U256, AppError>;

    /// The commitment hash for a pending request. Zero means the request was
    /// already fulfilled on chain.
    async fn commitment(&self, request_id: U256) -> Result<B256, AppError>;

    fn parse_random_words_requested(&self, raw: &Log) -> Result<RandomWordsRequested, AppError>;
}

pub struct ChainClient {
    provider: HttpProvider,
}

impl ChainClient {
    pub fn new(provider: HttpProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChainHead for ChainClient {
    async fn latest_block_number(&self) -> Result<u64, AppError> {
        let provider = self.provider.clone();
        READ_RETRY
            .run("latest head", move || {
                let provider = provider.clone();
                async move { provider.get_block_number().await }
            })
            .await
            .map_err(|e| AppError::Chain(format!("latest head read failed: {}", e)))
    }
}

pub struct OnchainCoordinator {
    address: Address,
    instance: VRFCoordinatorV2::VRFCoordinatorV2Instance<HttpProvider>,
}

impl OnchainCoordinator {
    pub fn new(address: Address, provider: HttpProvider) -> Self {
        Self {
            address,
            instance: VRFCoordinatorV2::new(address, provider),
        }
    }
}

#[async_trait]
impl CoordinatorApi for OnchainCoordinator {
    fn address(&self) -> Address {
        self.address
    }

    async fn subscription_balance(&self, sub_id: u64) -> Result<U256, AppError> {
        let instance = self.instance.clone();
        let sub = READ_RETRY
            .run("getSubscription", move || {
                let instance = instance.clone();
                async move { instance.getSubscription(sub_id).call().await }
            })
            .await
            .map_err(|e| AppError::Chain(format!("getSubscription({}) failed: {}", sub_id, e)))?;
        Ok(sub.balance.to::<U256>())
    }

    async fn commitment(&self, request_id: U256) -> Result<B256, AppError> {
        let instance = self.instance.clone();
        READ_RETRY
            .run("getCommitment", move || {
                let instance = instance.clone();
                async move { instance.getCommitment(request_id).call().await }
            })
            .await
            .map_err(|e| AppError::Chain(format!("getCommitment failed: {}", e)))
    }

    fn parse_random_words_requested(&self, raw: &Log) -> Result<RandomWordsRequested, AppError> {
        parse_random_words_requested(raw)
    }
}

pub fn parse_random_words_requested(raw: &Log) -> Result<RandomWordsRequested, AppError> {
    let meta = RawLogMeta::from_log(raw)
        .ok_or_else(|| AppError::Parse("log is missing block metadata".into()))?;
    let ev = VRFCoordinatorV2::RandomWordsRequested::decode_log(&raw.inner)
        .map_err(|e| AppError::Parse(format!("RandomWordsRequested decode failed: {}", e)))?
        .data;
    Ok(RandomWordsRequested {
        key_hash: ev.keyHash,
        request_id: ev.requestId,
        pre_seed: ev.preSeed,
        sub_id: ev.subId,
        minimum_request_confirmations: ev.minimumRequestConfirmations,
        callback_gas_limit: ev.callbackGasLimit,
        num_words: ev.numWords,
        sender: ev.sender,
        raw: meta,
    })
}

pub fn parse_random_words_fulfilled(raw: &Log) -> Result<RandomWordsFulfilled, AppError> {
    let meta = RawLogMeta::from_log(raw)
        .ok_or_else(|| AppError::Parse("log is missing block metadata".into()))?;
    let ev = VRFCoordinatorV2::RandomWordsFulfilled::decode_log(&raw.inner)
        .map_err(|e| AppError::Parse(format!("RandomWordsFulfilled decode failed: {}", e)))?
        .data;
    Ok(RandomWordsFulfilled {
        request_id: ev.requestId,
        success: ev.success,
        raw: meta,
    })
}

/// A commitment of all zero bytes means the coordinator already accepted a
/// fulfillment for the request.
pub fn commitment_is_empty(commitment: &B256) -> bool {
    commitment.is_zero()
}
