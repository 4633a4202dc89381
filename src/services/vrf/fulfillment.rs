// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use crate::core::request::{PendingRequest, RandomWordsRequested};
use crate::data::txm::{EthTxMeta, NewTx, TxStrategy};
use crate::network::coordinator::commitment_is_empty;
use crate::services::vrf::listener::VrfListener;
use crate::services::vrf::pipeline::SimulatedRun;
use alloy::primitives::{Address, U256};
use std::collections::HashSet;
use std::sync::atomic::Ordering;

impl VrfListener {
    /// One scheduler tick: read the tip, run the pass per subscription, then
    /// prune the reorg tracker.
    pub async fn process_pending_requests(&self) {
        let tip = match self.chain.latest_block_number().await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::error!(error = %e, "VrfListener: unable to read latest head");
                return;
            }
        };

        let confirmed = self.pending.lock().await.confirmed_by_sub(tip);
        if confirmed.is_empty() {
            tracing::info!("VrfListener: no pending requests");
        }

        for (sub_id, reqs) in confirmed {
            let start_balance = match self.coordinator.subscription_balance(sub_id).await {
                Ok(balance) => balance,
                // A single unreadable subscription must not starve the rest;
                // its requests stay pending for the next tick.
                Err(e) => {
                    tracing::error!(sub_id, error = %e, "VrfListener: unable to read subscription balance");
                    continue;
                }
            };
            self.process_requests_per_sub(
                sub_id,
                self.cfg.from_address,
                start_balance,
                self.cfg.max_gas_price_wei,
                reqs,
            )
            .await;
        }

        self.reorg.lock().await.prune(tip);
    }

    /// Subtract in-flight reservations from the on-chain balance. The
    /// external submitter may hold many unmined fulfillments, each already
    /// committing budget at its declared max cost; without this the pass
    /// would over-commit against the same balance.
    async fn subtract_reserved_link(
        &self,
        from: Address,
        start_balance: U256,
    ) -> Result<U256, AppError> {
        let reserved = self.db.reserved_link(from).await.inspect_err(|e| {
            tracing::error!(error = %e, "VrfListener: reserved link query failed");
        })?;
        Ok(start_balance.saturating_sub(reserved))
    }

    /// Attempt to fulfill every confirmed request of one subscription in
    /// insertion order, breaking when the balance runs out.
    pub(crate) async fn process_requests_per_sub(
        &self,
        sub_id: u64,
        from: Address,
        start_balance: U256,
        max_gas_price_wei: U256,
        reqs: Vec<PendingRequest>,
    ) {
        let Ok(mut balance) = self.subtract_reserved_link(from, start_balance).await else {
            return;
        };

        let total = reqs.len();
        let mut processed: HashSet<U256> = HashSet::new();
        for pending in reqs {
            let req = &pending.req;

            // The consumed re-check must happen in the same task as the mark
            // to avoid two consumers enqueuing the same fulfillment.
            match self.should_process_log(&req.raw).await {
                Some(true) => {}
                _ => return,
            }

            match self.coordinator.commitment(req.request_id).await {
                Ok(commitment) if commitment_is_empty(&commitment) => {
                    tracing::info!(
                        tx_hash = %req.raw.tx_hash,
                        sub_id,
                        "VrfListener: request already fulfilled"
                    );
                    self.mark_log_consumed_best_effort(&req.raw).await;
                    self.stats.already_fulfilled.fetch_add(1, Ordering::Relaxed);
                    processed.insert(req.request_id);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        tx_hash = %req.raw.tx_hash,
                        error = %e,
                        "VrfListener: unable to check if already fulfilled, processing anyways"
                    );
                }
            }

            let run = match self.pipeline.simulate(req, max_gas_price_wei).await {
                Ok(run) => run,
                Err(e) => {
                    tracing::warn!(
                        req_id = %req.request_id,
                        error = %e,
                        "VrfListener: simulation errored, possibly insufficient funds. \
                         Request will remain unprocessed until funds are available"
                    );
                    self.stats
                        .simulation_failures
                        .fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if balance < run.max_link {
                // Have to wait for a user top up; later (possibly cheaper)
                // requests are deliberately not tried, oldest goes first.
                tracing::info!(
                    balance = %balance,
                    max_link = %run.max_link,
                    "VrfListener: insufficient link balance to fulfill a request, breaking"
                );
                self.stats
                    .insufficient_funds_waits
                    .fetch_add(1, Ordering::Relaxed);
                break;
            }

            tracing::info!(
                balance = %balance,
                req_id = %req.request_id,
                "VrfListener: enqueuing fulfillment"
            );
            match self.enqueue_fulfillment(from, req, &run).await {
                Ok(()) => {
                    balance -= run.max_link;
                    processed.insert(req.request_id);
                    self.stats
                        .fulfillments_enqueued
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!(
                        req_id = %req.request_id,
                        error = %e,
                        "VrfListener: failed to enqueue fulfillment"
                    );
                    continue;
                }
            }
        }

        let mut pending = self.pending.lock().await;
        pending.remove_processed(&processed);
        self.stats
            .pending_depth
            .store(pending.len() as u64, Ordering::Relaxed);
        drop(pending);

        tracing::info!(
            sub_id,
            total_reqs = total,
            total_processed = processed.len(),
            "VrfListener: finished processing for sub"
        );
    }

    /// Record the finished run, mark the input log consumed, and enqueue the
    /// transaction, all in one database transaction. This is what makes
    /// submission at-most-once across crashes: either the log is consumed
    /// and the transaction row exists, or neither.
    async fn enqueue_fulfillment(
        &self,
        from: Address,
        req: &RandomWordsRequested,
        run: &SimulatedRun,
    ) -> Result<(), AppError> {
        let mut dbtx = self.db.begin().await?;
        self.db
            .insert_pipeline_run(&mut *dbtx, req.request_id, run.max_link, run.gas_limit, &run.payload)
            .await?;
        let (block_hash, log_index) = req.raw.consumed_key();
        self.db
            .mark_log_consumed(&mut *dbtx, block_hash, log_index)
            .await?;
        self.txm
            .create_eth_transaction(
                &mut *dbtx,
                NewTx {
                    from_address: from,
                    to_address: self.coordinator.address(),
                    encoded_payload: run.payload.clone(),
                    gas_limit: run.gas_limit,
                    meta: EthTxMeta {
                        request_id: req.request_id,
                        max_link: run.max_link,
                    },
                    min_confirmations: self.cfg.outgoing_confirmations,
                    strategy: TxStrategy::SendEvery,
                },
            )
            .await?;
        dbtx.commit().await?;
        Ok(())
    }
}
