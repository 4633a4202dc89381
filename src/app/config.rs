// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use alloy::primitives::{Address, B256, U256};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    // General
    #[serde(default = "default_debug")]
    pub debug: bool,
    #[serde(default = "default_database_url")]
    pub database_url: String,

    // Endpoints
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub prover_url: String,

    // Contracts
    pub coordinator_address: Address,
    /// Hash of the VRF public key this job serves; only requests carrying it
    /// are picked up.
    pub key_hash: B256,
    pub link_native_feed: Option<Address>,

    // Identity
    pub from_address: Address,

    // Fulfillment
    #[serde(default = "default_min_confs")]
    pub min_incoming_confirmations: u64,
    #[serde(default)]
    pub job_confirmations: u64,
    #[serde(default = "default_outgoing_confs")]
    pub outgoing_confirmations: u32,
    #[serde(default = "default_max_gas")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    #[serde(default = "default_log_lookback")]
    pub log_lookback_blocks: u64,

    // Observability
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_debug() -> bool {
    false
}
fn default_database_url() -> String {
    "sqlite://vrf_fulfiller.db?mode=rwc".to_string()
}
fn default_min_confs() -> u64 {
    3
}
fn default_outgoing_confs() -> u32 {
    12
}
fn default_max_gas() -> u64 {
    200
}
fn default_tick_interval_ms() -> u64 {
    2_000
}
fn default_mailbox_capacity() -> usize {
    100_000
}
fn default_log_lookback() -> u64 {
    1_000
}
fn default_metrics_port() -> u16 {
    9000
}

impl Settings {
    pub fn load_with_path(path: Option<&str>) -> Result<Self, AppError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }
        // Environment (and .env) override file values
        builder = builder.add_source(Environment::default());

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.max_gas_price_gwei == 0 {
            return Err(AppError::Config("max_gas_price_gwei must be > 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(AppError::Config("tick_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn max_gas_price_wei(&self) -> U256 {
        U256::from(self.max_gas_price_gwei) * U256::from(1_000_000_000u64)
    }
}
