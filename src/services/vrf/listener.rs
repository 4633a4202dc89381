// SPDX-License-Identifier: MIT

use crate::common::error::AppError;
use crate::core::mailbox::Mailbox;
use crate::core::reorg::ReorgTracker;
use crate::core::request::{
    DecodedEvent, LogEnvelope, PendingRequest, PendingSet, RandomWordsFulfilled,
    RandomWordsRequested, RawLogMeta,
};
use crate::data::db::Database;
use crate::data::txm::TxManager;
use crate::network::coordinator::{ChainHead, CoordinatorApi};
use crate::services::vrf::pipeline::FulfillmentPipeline;
use crate::services::vrf::stats::VrfStats;
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct VrfJobConfig {
    /// Sending address; one per job.
    pub from_address: Address,
    /// Node-wide confirmation floor.
    pub min_incoming_confirmations: u64,
    /// Job-level confirmation requirement; the larger of the two wins.
    pub job_confirmations: u64,
    /// Confirmations the submitter waits for on the outgoing transaction.
    pub outgoing_confirmations: u32,
    pub max_gas_price_wei: U256,
    pub tick_interval: Duration,
}

impl VrfJobConfig {
    pub fn base_confs(&self) -> u64 {
        self.min_incoming_confirmations.max(self.job_confirmations)
    }
}

const STATE_UNSTARTED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// The fulfillment core. Two cooperating tasks share this instance: the log
/// router drains the mailbox, the tick scheduler runs the fulfillment pass.
pub struct VrfListener {
    pub(crate) cfg: VrfJobConfig,
    pub(crate) db: Database,
    pub(crate) txm: TxManager,
    pub(crate) chain: Arc<dyn ChainHead>,
    pub(crate) coordinator: Arc<dyn CoordinatorApi>,
    pub(crate) pipeline: Arc<dyn FulfillmentPipeline>,
    pub(crate) stats: Arc<VrfStats>,
    mailbox: Arc<Mailbox<LogEnvelope>>,
    pub(crate) pending: Mutex<PendingSet>,
    pub(crate) reorg: Mutex<ReorgTracker>,
    shutdown: CancellationToken,
    state: AtomicU8,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl VrfListener {
    pub fn new(
        cfg: VrfJobConfig,
        db: Database,
        txm: TxManager,
        chain: Arc<dyn ChainHead>,
        coordinator: Arc<dyn CoordinatorApi>,
        pipeline: Arc<dyn FulfillmentPipeline>,
        stats: Arc<VrfStats>,
        mailbox: Arc<Mailbox<LogEnvelope>>,
    ) -> Self {
        Self {
            cfg,
            db,
            txm,
            chain,
            coordinator,
            pipeline,
            stats,
            mailbox,
            pending: Mutex::new(PendingSet::default()),
            reorg: Mutex::new(ReorgTracker::default()),
            shutdown: CancellationToken::new(),
            state: AtomicU8::new(STATE_UNSTARTED),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The queue producers deliver broadcasts into.
    pub fn mailbox(&self) -> Arc<Mailbox<LogEnvelope>> {
        self.mailbox.clone()
    }

    /// Child token for collaborators that should stop with the listener.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Launch the log router and the tick scheduler. Start-once: a second
    /// call is an error.
    pub async fn start(self: Arc<Self>) -> Result<(), AppError> {
        self.state
            .compare_exchange(
                STATE_UNSTARTED,
                STATE_STARTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| AppError::Lifecycle("VrfListener already started".into()))?;

        tracing::info!(
            base_confs = self.cfg.base_confs(),
            "VrfListener: listening for request logs"
        );

        let router = {
            let listener = self.clone();
            tokio::spawn(async move {
                // An abnormal exit drops the guard and stops the sibling;
                // the subsystem never keeps running half-alive.
                let _guard = listener.shutdown.clone().drop_guard();
                listener.run_log_router().await;
            })
        };
        let scheduler = {
            let listener = self.clone();
            tokio::spawn(async move {
                let _guard = listener.shutdown.clone().drop_guard();
                listener.run_request_handler().await;
            })
        };

        let mut handles = self.handles.lock().await;
        handles.push(router);
        handles.push(scheduler);
        Ok(())
    }

    /// Signal both tasks and wait for them to acknowledge. Stop-once. A task
    /// that terminated by panic is reported as an error instead of being
    /// silently restarted.
    pub async fn close(&self) -> Result<(), AppError> {
        self.state
            .compare_exchange(
                STATE_STARTED,
                STATE_STOPPED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| AppError::Lifecycle("VrfListener not running".into()))?;

        self.shutdown.cancel();
        let mut failed = false;
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().await;
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                tracing::error!("VrfListener: task panicked: {}", e);
                failed = true;
            }
        }
        if failed {
            return Err(AppError::Lifecycle(
                "VrfListener task terminated abnormally".into(),
            ));
        }
        Ok(())
    }

    /// Single consumer: drain the mailbox on each wake.
    async fn run_log_router(&self) {
        loop {
            let notified = self.mailbox.notified();
            while let Some(envelope) = self.mailbox.retrieve().await {
                self.handle_log(envelope).await;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = notified => {}
            }
        }
    }

    /// One fulfillment pass per tick.
    async fn run_request_handler(&self) {
        let mut tick = tokio::time::interval(self.cfg.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; skip the zeroth tick.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tick.tick() => self.process_pending_requests().await,
            }
        }
    }

    /// Route one broadcast.
    pub async fn handle_log(&self, envelope: LogEnvelope) {
        self.stats.logs_received.fetch_add(1, Ordering::Relaxed);
        match envelope.decoded.clone() {
            Some(DecodedEvent::Fulfilled(fulfilled)) => {
                self.handle_fulfilled(fulfilled).await;
            }
            Some(DecodedEvent::Requested(req)) => {
                self.add_pending(req).await;
            }
            None => {
                match self.coordinator.parse_random_words_requested(&envelope.raw) {
                    Ok(req) => self.add_pending(req).await,
                    Err(e) => self.drop_unparseable(&envelope, e).await,
                }
            }
        }
    }

    async fn handle_fulfilled(&self, fulfilled: RandomWordsFulfilled) {
        tracing::info!(
            req_id = %fulfilled.request_id,
            success = fulfilled.success,
            "VrfListener: received fulfilled log"
        );
        match self.should_process_log(&fulfilled.raw).await {
            Some(true) => {}
            Some(false) => {
                self.stats.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            // Consumed check failed; leave it for the broadcaster to resend.
            None => return,
        }

        {
            let mut reorg = self.reorg.lock().await;
            reorg.observe(fulfilled.request_id, fulfilled.raw.block_number);
        }
        self.mark_log_consumed_best_effort(&fulfilled.raw).await;
    }

    async fn add_pending(&self, req: RandomWordsRequested) {
        let confirmed_at = {
            let reorg = self.reorg.lock().await;
            let count = reorg.fulfillment_count(req.request_id);
            let confs = reorg.confs_factor(req.request_id, self.cfg.base_confs());
            if count > 0 {
                tracing::warn!(
                    tx_hash = %req.raw.tx_hash,
                    block_number = req.raw.block_number,
                    block_hash = %req.raw.block_hash,
                    req_id = %req.request_id,
                    new_confs = confs,
                    "VrfListener: duplicate request found after fulfillment, doubling incoming confirmations"
                );
            }
            req.raw.block_number + confs
        };

        let mut pending = self.pending.lock().await;
        pending.push(PendingRequest {
            confirmed_at_block: confirmed_at,
            req,
        });
        self.stats
            .pending_depth
            .store(pending.len() as u64, Ordering::Relaxed);
        self.stats.requests_added.fetch_add(1, Ordering::Relaxed);
    }

    async fn drop_unparseable(&self, envelope: &LogEnvelope, err: AppError) {
        tracing::error!(
            tx_hash = ?envelope.raw.transaction_hash,
            error = %err,
            "VrfListener: failed to parse log"
        );
        self.stats.parse_failures.fetch_add(1, Ordering::Relaxed);
        let Some((block_hash, log_index)) = envelope.consumed_key() else {
            return;
        };
        let meta = RawLogMeta {
            block_hash,
            block_number: envelope.raw.block_number.unwrap_or_default(),
            tx_hash: envelope.raw.transaction_hash.unwrap_or_default(),
            log_index,
            topics: envelope.raw.inner.topics().to_vec(),
            data: envelope.raw.inner.data.data.clone(),
        };
        match self.should_process_log(&meta).await {
            Some(true) => self.mark_log_consumed_best_effort(&meta).await,
            _ => {}
        }
    }

    /// Whether the log is still unconsumed. `None` means the check itself
    /// failed; callers must not process, the broadcaster re-delivers.
    pub(crate) async fn should_process_log(&self, meta: &RawLogMeta) -> Option<bool> {
        let (block_hash, log_index) = meta.consumed_key();
        match self.db.was_log_consumed(block_hash, log_index).await {
            Ok(consumed) => Some(!consumed),
            Err(e) => {
                tracing::error!(
                    tx_hash = %meta.tx_hash,
                    error = %e,
                    "VrfListener: could not determine if log was already consumed"
                );
                None
            }
        }
    }

    pub(crate) async fn mark_log_consumed_best_effort(&self, meta: &RawLogMeta) {
        let (block_hash, log_index) = meta.consumed_key();
        if let Err(e) = self
            .db
            .mark_log_consumed(self.db.pool(), block_hash, log_index)
            .await
        {
            tracing::error!(
                tx_hash = %meta.tx_hash,
                error = %e,
                "VrfListener: unable to mark log as consumed"
            );
        }
    }

    /// Test-facing view of the pending queue.
    pub async fn pending_request_ids(&self) -> Vec<U256> {
        self.pending.lock().await.request_ids()
    }
}
