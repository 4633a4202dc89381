// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use crate::common::retry::READ_RETRY;
use crate::core::request::RandomWordsRequested;
use crate::network::prover::VrfProver;
use crate::network::provider::HttpProvider;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::providers::Provider;
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy::sol;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of simulating one fulfillment: the worst-case cost in juels at the
/// max gas price, the encoded fulfillment calldata, and the gas limit to
/// submit with.
#[derive(Debug, Clone)]
pub struct SimulatedRun {
    pub max_link: U256,
    pub payload: Bytes,
    pub gas_limit: u64,
}

/// Derives a worst-case cost estimate and an encoded payload for a request.
#[async_trait]
pub trait FulfillmentPipeline: Send + Sync {
    async fn simulate(
        &self,
        req: &RandomWordsRequested,
        max_gas_price_wei: U256,
    ) -> Result<SimulatedRun, AppError>;
}

sol! {
    #[sol(rpc)]
    contract AggregatorV3Interface {
        function latestRoundData()
            external
            view
            returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound);
    }
}

/// Gas-limit padding over the node's estimate, in percent.
const GAS_BUFFER_PCT: u64 = 10;

/// Pipeline backed by the prover endpoint and an `eth_estimateGas`
/// simulation against the coordinator.
///
/// The worst-case wei cost is `gas_limit * max_gas_price`; when a LINK/native
/// aggregator is configured the cost is converted to juels through its latest
/// answer, otherwise wei and juels are taken at par.
pub struct SimulationPipeline {
    provider: HttpProvider,
    coordinator: Address,
    from: Address,
    prover: Arc<dyn VrfProver>,
    link_native_feed: Option<Address>,
}

impl SimulationPipeline {
    pub fn new(
        provider: HttpProvider,
        coordinator: Address,
        from: Address,
        prover: Arc<dyn VrfProver>,
        link_native_feed: Option<Address>,
    ) -> Self {
        Self {
            provider,
            coordinator,
            from,
            prover,
            link_native_feed,
        }
    }

    async fn link_per_native(&self) -> Result<Option<U256>, AppError> {
        let Some(feed) = self.link_native_feed else {
            return Ok(None);
        };
        let instance = AggregatorV3Interface::new(feed, self.provider.clone());
        let round = READ_RETRY
            .run("LINK/native feed", move || {
                let instance = instance.clone();
                async move { instance.latestRoundData().call().await }
            })
            .await
            .map_err(|e| AppError::Simulation(format!("LINK/native feed read failed: {}", e)))?;

        if round.answer.is_negative() || round.answer.is_zero() {
            return Err(AppError::Simulation(format!(
                "LINK/native feed returned invalid answer {}",
                round.answer
            )));
        }
        Ok(Some(round.answer.into_raw()))
    }
}

#[async_trait]
impl FulfillmentPipeline for SimulationPipeline {
    async fn simulate(
        &self,
        req: &RandomWordsRequested,
        max_gas_price_wei: U256,
    ) -> Result<SimulatedRun, AppError> {
        let payload = self.prover.prove(req).await?;

        let call = TransactionRequest {
            from: Some(self.from),
            to: Some(TxKind::Call(self.coordinator)),
            input: TransactionInput::new(payload.clone()),
            ..Default::default()
        };
        let estimate = self
            .provider
            .estimate_gas(call)
            .await
            .map_err(|e| AppError::Simulation(format!("estimate_gas failed: {}", e)))?;
        let gas_limit = estimate.saturating_add(estimate.saturating_mul(GAS_BUFFER_PCT) / 100);

        let wei_cost = max_gas_price_wei.saturating_mul(U256::from(gas_limit));
        let max_link = match self.link_per_native().await? {
            // juels = wei * 1e18 / (wei per LINK)
            Some(wei_per_link) => wei_cost
                .saturating_mul(U256::from(10u64).pow(U256::from(18u64)))
                .checked_div(wei_per_link)
                .ok_or_else(|| AppError::Simulation("zero LINK/native price".into()))?,
            None => wei_cost,
        };

        Ok(SimulatedRun {
            max_link,
            payload,
            gas_limit,
        })
    }
}
