// SPDX-License-Identifier: MIT

use std::future::Future;
use std::time::Duration;

/// Backoff schedule for chain reads (head, coordinator, aggregator feed).
/// The tick path blocks on these, so the schedule stays tight: three
/// attempts doubling from 100ms. A read that fails the whole schedule is
/// handled by the caller, typically by leaving the request for a later tick.
pub const READ_RETRY: RpcRetry = RpcRetry {
    attempts: 3,
    initial_delay: Duration::from_millis(100),
};

#[derive(Clone, Copy, Debug)]
pub struct RpcRetry {
    attempts: u32,
    initial_delay: Duration,
}

impl RpcRetry {
    /// Run `op` until it succeeds or the schedule is exhausted, returning
    /// the last error. `label` names the read in retry logs.
    pub async fn run<F, Fut, T, E>(self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delay = self.initial_delay;
        let mut remaining = self.attempts.max(1);
        loop {
            remaining -= 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if remaining > 0 => {
                    tracing::debug!(target: "rpc", label, error = %e, "Read failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
