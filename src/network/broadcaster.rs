// SPDX-License-Identifier: MIT

use crate::core::mailbox::Mailbox;
use crate::core::request::{DecodedEvent, LogEnvelope};
use crate::data::db::Database;
use crate::network::coordinator::{
    VRFCoordinatorV2, parse_random_words_fulfilled, parse_random_words_requested,
};
use crate::network::provider::{HttpProvider, WsProvider};
use crate::services::vrf::stats::VrfStats;
use alloy::primitives::B256;
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy_sol_types::SolEvent;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Streams coordinator logs into the listener's mailbox.
///
/// On every (re)connect a backfill pass replays logs from a lookback window
/// and delivers any that are not yet marked consumed, so requests that
/// arrived while the service was down or disconnected are not lost.
/// Duplicate deliveries are harmless: the router checks the consumed marker.
pub struct LogBroadcaster {
    ws: WsProvider,
    http: HttpProvider,
    db: Database,
    mailbox: Arc<Mailbox<LogEnvelope>>,
    filter: Filter,
    key_hash: B256,
    lookback_blocks: u64,
    stats: Arc<VrfStats>,
    shutdown: CancellationToken,
}

impl LogBroadcaster {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ws: WsProvider,
        http: HttpProvider,
        db: Database,
        coordinator: alloy::primitives::Address,
        key_hash: B256,
        lookback_blocks: u64,
        mailbox: Arc<Mailbox<LogEnvelope>>,
        stats: Arc<VrfStats>,
        shutdown: CancellationToken,
    ) -> Self {
        let filter = Filter::new().address(coordinator).event_signature(vec![
            VRFCoordinatorV2::RandomWordsRequested::SIGNATURE_HASH,
            VRFCoordinatorV2::RandomWordsFulfilled::SIGNATURE_HASH,
        ]);
        Self {
            ws,
            http,
            db,
            mailbox,
            filter,
            key_hash,
            lookback_blocks,
            stats,
            shutdown,
        }
    }

    pub async fn run(self) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            self.backfill_unconsumed().await;

            match self.ws.subscribe_logs(&self.filter).await {
                Ok(sub) => {
                    tracing::info!(target: "broadcaster", "Subscribed to coordinator logs");
                    let mut stream = sub.into_stream();
                    loop {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            next = stream.next() => match next {
                                Some(log) => self.deliver(&log).await,
                                None => {
                                    tracing::warn!(target: "broadcaster", "Log stream ended, resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "broadcaster", error = %e, "Log subscription failed, retrying");
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    /// Replay recent logs and deliver the ones not yet consumed.
    async fn backfill_unconsumed(&self) {
        let tip = match self.http.get_block_number().await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!(target: "broadcaster", error = %e, "Backfill skipped, tip read failed");
                return;
            }
        };
        let from_block = tip.saturating_sub(self.lookback_blocks);
        let filter = self.filter.clone().from_block(from_block);

        let logs = match self.http.get_logs(&filter).await {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!(target: "broadcaster", error = %e, "Backfill get_logs failed");
                return;
            }
        };

        let mut replayed = 0usize;
        for log in &logs {
            if let (Some(block_hash), Some(log_index)) = (log.block_hash, log.log_index) {
                match self.db.was_log_consumed(block_hash, log_index).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(target: "broadcaster", error = %e, "Backfill consumed check failed");
                        continue;
                    }
                }
            }
            self.deliver(log).await;
            replayed += 1;
        }
        if replayed > 0 {
            tracing::info!(target: "broadcaster", count = replayed, from_block, "Replayed unconsumed logs");
        }
    }

    async fn deliver(&self, log: &Log) {
        let Some(envelope) = self.decode(log) else {
            return;
        };
        let delivery = self.mailbox.deliver(envelope).await;
        if delivery.was_over_capacity {
            self.stats
                .mailbox_overflows
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::error!(target: "broadcaster", "Log mailbox is over capacity - dropped the oldest log");
        }
    }

    /// Decode the log against the coordinator ABI. Requests for other key
    /// hashes are not ours and are dropped; undecodable logs are delivered
    /// with no decode so the router can record them as consumed.
    fn decode(&self, log: &Log) -> Option<LogEnvelope> {
        let decoded = match log.inner.topics().first() {
            Some(&topic) if topic == VRFCoordinatorV2::RandomWordsRequested::SIGNATURE_HASH => {
                match parse_random_words_requested(log) {
                    Ok(req) => {
                        if req.key_hash != self.key_hash {
                            return None;
                        }
                        Some(DecodedEvent::Requested(req))
                    }
                    Err(_) => None,
                }
            }
            Some(&topic) if topic == VRFCoordinatorV2::RandomWordsFulfilled::SIGNATURE_HASH => {
                parse_random_words_fulfilled(log)
                    .ok()
                    .map(DecodedEvent::Fulfilled)
            }
            _ => None,
        };

        Some(LogEnvelope {
            decoded,
            raw: log.clone(),
        })
    }
}
