// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use alloy::primitives::{Address, B256, Bytes, U256};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite, Transaction};

/// Transaction states that no longer reserve budget: the spend either
/// settled on chain or will never happen.
const SETTLED_STATES: [&str; 3] = ["fatal_error", "confirmed", "confirmed_missing_receipt"];

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Initialization(format!("DB connect failed: {}", e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Initialization(format!("DB migration failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn was_log_consumed(
        &self,
        block_hash: B256,
        log_index: u64,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM log_consumptions WHERE block_hash = ? AND log_index = ?",
        )
        .bind(block_hash.to_string())
        .bind(log_index as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Record the consumed marker. Takes any executor so the caller can
    /// group it with the fulfillment enqueue in one transaction.
    pub async fn mark_log_consumed<'e, E>(
        &self,
        executor: E,
        block_hash: B256,
        log_index: u64,
    ) -> Result<(), AppError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT OR IGNORE INTO log_consumptions (block_hash, log_index) VALUES (?, ?)",
        )
        .bind(block_hash.to_string())
        .bind(log_index as i64)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Sum of `max_link` over in-flight transactions from `from_address`.
    ///
    /// SQLite cannot SUM 78-digit decimals exactly, so the values are fetched
    /// as strings and folded into a U256 here.
    pub async fn reserved_link(&self, from_address: Address) -> Result<U256, AppError> {
        let rows = sqlx::query(
            "SELECT max_link FROM eth_txes \
             WHERE from_address = ? AND max_link IS NOT NULL \
             AND state NOT IN (?, ?, ?)",
        )
        .bind(from_address.to_string())
        .bind(SETTLED_STATES[0])
        .bind(SETTLED_STATES[1])
        .bind(SETTLED_STATES[2])
        .fetch_all(&self.pool)
        .await?;

        let mut total = U256::ZERO;
        for row in rows {
            let raw: String = row.get("max_link");
            let value = U256::from_str_radix(&raw, 10)
                .map_err(|e| AppError::Parse(format!("bad max_link {:?}: {}", raw, e)))?;
            total = total.saturating_add(value);
        }
        Ok(total)
    }

    pub async fn insert_pipeline_run<'e, E>(
        &self,
        executor: E,
        request_id: U256,
        max_link: U256,
        gas_limit: u64,
        payload: &Bytes,
    ) -> Result<i64, AppError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            "INSERT INTO pipeline_runs (request_id, max_link, gas_limit, payload) \
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(request_id.to_string())
        .bind(max_link.to_string())
        .bind(gas_limit as i64)
        .bind(payload.as_ref())
        .fetch_one(executor)
        .await?;
        Ok(row.get("id"))
    }
}
