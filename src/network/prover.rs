// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use crate::core::request::RandomWordsRequested;
use alloy::primitives::{Bytes, hex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Produces the proof-carrying fulfillment payload for a request. Randomness
/// generation itself lives outside this service.
#[async_trait]
pub trait VrfProver: Send + Sync {
    async fn prove(&self, req: &RandomWordsRequested) -> Result<Bytes, AppError>;
}

#[derive(Serialize)]
struct ProofRequest<'a> {
    key_hash: String,
    pre_seed: String,
    block_hash: String,
    block_number: u64,
    sub_id: u64,
    callback_gas_limit: u32,
    num_words: u32,
    sender: &'a str,
}

#[derive(Deserialize)]
struct ProofResponse {
    /// Hex-encoded calldata for the coordinator's fulfill entrypoint.
    payload: String,
}

/// Prover reached over HTTP. The endpoint holds the VRF key and answers with
/// the encoded fulfillment calldata for a request.
pub struct HttpProver {
    client: reqwest::Client,
    url: Url,
}

impl HttpProver {
    pub fn new(url: &str) -> Result<Self, AppError> {
        let url =
            Url::parse(url).map_err(|e| AppError::Config(format!("Invalid prover URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("Prover client build failed: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl VrfProver for HttpProver {
    async fn prove(&self, req: &RandomWordsRequested) -> Result<Bytes, AppError> {
        let sender = req.sender.to_string();
        let body = ProofRequest {
            key_hash: req.key_hash.to_string(),
            pre_seed: req.pre_seed.to_string(),
            block_hash: req.raw.block_hash.to_string(),
            block_number: req.raw.block_number,
            sub_id: req.sub_id,
            callback_gas_limit: req.callback_gas_limit,
            num_words: req.num_words,
            sender: &sender,
        };

        let resp = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Prover(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::Prover(format!(
                "prover responded with {}",
                resp.status()
            )));
        }

        let proof: ProofResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Prover(format!("bad response body: {}", e)))?;

        let raw = hex::decode(proof.payload.trim_start_matches("0x"))
            .map_err(|e| AppError::Prover(format!("payload is not hex: {}", e)))?;
        Ok(Bytes::from(raw))
    }
}
