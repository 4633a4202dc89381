// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use alloy::network::Ethereum;
use alloy::providers::RootProvider;
use url::Url;

pub type HttpProvider = RootProvider<Ethereum>;
pub type WsProvider = RootProvider<Ethereum>;

pub struct ConnectionFactory;

impl ConnectionFactory {
    /// Try WS first for streaming, fall back to HTTP for everything.
    pub async fn preferred(
        ws_url: Option<&str>,
        rpc_url: &str,
    ) -> Result<(WsProvider, HttpProvider), AppError> {
        let http = Self::http(rpc_url)?;

        if let Some(ws_url) = ws_url {
            match Self::ws(ws_url).await {
                Ok(ws_provider) => {
                    tracing::info!(target: "rpc", %ws_url, "Using WS provider for log streaming");
                    return Ok((ws_provider, http));
                }
                Err(e) => {
                    tracing::warn!(
                        target: "rpc",
                        %ws_url,
                        error = %e,
                        "WS connection failed; falling back to HTTP polling"
                    );
                }
            }
        } else {
            tracing::debug!(target: "rpc", "No WS URL configured; using HTTP only");
        }

        Ok((http.clone(), http))
    }

    pub fn http(rpc_url: &str) -> Result<HttpProvider, AppError> {
        let url =
            Url::parse(rpc_url).map_err(|e| AppError::Config(format!("Invalid RPC URL: {}", e)))?;
        Ok(RootProvider::new_http(url))
    }

    pub async fn ws(ws_url: &str) -> Result<WsProvider, AppError> {
        RootProvider::connect(ws_url)
            .await
            .map_err(|e| AppError::Connection(format!("WS connection failed: {}", e)))
    }
}
