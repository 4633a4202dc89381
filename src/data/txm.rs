// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use alloy::primitives::{Address, Bytes, U256};
use sqlx::{Row, Sqlite};

/// Metadata attached to a fulfillment transaction. `max_link` tags the
/// worst-case cost so in-flight rows can be counted as reserved budget.
#[derive(Debug, Clone)]
pub struct EthTxMeta {
    pub request_id: U256,
    pub max_link: U256,
}

#[derive(Debug, Clone, Copy)]
pub enum TxStrategy {
    /// Send unconditionally; the fulfillment was already simulated.
    SendEvery,
}

impl TxStrategy {
    fn as_str(self) -> &'static str {
        match self {
            TxStrategy::SendEvery => "send_every",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTx {
    pub from_address: Address,
    pub to_address: Address,
    pub encoded_payload: Bytes,
    pub gas_limit: u64,
    pub meta: EthTxMeta,
    pub min_confirmations: u32,
    pub strategy: TxStrategy,
}

/// Enqueues transactions for the external submitter by writing `eth_txes`
/// rows. The submitter owns everything after the row exists; this side never
/// cancels or resubmits.
#[derive(Clone, Default)]
pub struct TxManager;

impl TxManager {
    pub fn new() -> Self {
        Self
    }

    /// Insert the queue row. Takes any executor so the caller can make the
    /// enqueue atomic with the consumed marker and the run record.
    pub async fn create_eth_transaction<'e, E>(&self, executor: E, tx: NewTx) -> Result<i64, AppError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            "INSERT INTO eth_txes \
             (from_address, to_address, encoded_payload, gas_limit, request_id, max_link, min_confirmations, strategy) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(tx.from_address.to_string())
        .bind(tx.to_address.to_string())
        .bind(tx.encoded_payload.as_ref())
        .bind(tx.gas_limit as i64)
        .bind(tx.meta.request_id.to_string())
        .bind(tx.meta.max_link.to_string())
        .bind(tx.min_confirmations as i64)
        .bind(tx.strategy.as_str())
        .fetch_one(executor)
        .await?;
        Ok(row.get("id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::db::Database;

    #[tokio::test]
    async fn enqueued_tx_reserves_its_max_link() {
        let db = Database::new("sqlite::memory:").await.expect("db");
        let txm = TxManager::new();
        let from = Address::with_last_byte(3);

        let id = txm
            .create_eth_transaction(
                db.pool(),
                NewTx {
                    from_address: from,
                    to_address: Address::with_last_byte(9),
                    encoded_payload: Bytes::from(vec![0xde, 0xad]),
                    gas_limit: 500_000,
                    meta: EthTxMeta {
                        request_id: U256::from(11u64),
                        max_link: U256::from(600u64),
                    },
                    min_confirmations: 12,
                    strategy: TxStrategy::SendEvery,
                },
            )
            .await
            .unwrap();
        assert!(id > 0);

        // A freshly enqueued row is in-flight and counts as reserved.
        assert_eq!(db.reserved_link(from).await.unwrap(), U256::from(600u64));
    }
}
