// SPDX-License-Identifier: MIT
// Start/stop discipline and the live router task: broadcasts delivered into
// the mailbox are picked up without driving the router by hand.

mod common;

use common::*;
use std::time::Duration;

#[tokio::test]
async fn start_and_stop_are_once_only() {
    let h = Harness::new(3).await;

    h.listener.clone().start().await.expect("first start");
    assert!(h.listener.clone().start().await.is_err());

    h.listener.close().await.expect("first close");
    assert!(h.listener.close().await.is_err());
}

#[tokio::test]
async fn running_router_drains_delivered_broadcasts() {
    let h = Harness::new(3).await;
    h.set_balance(1, 1_000);
    h.listener.clone().start().await.expect("start");

    let mailbox = h.listener.mailbox();
    mailbox.deliver(requested_envelope(70, 1, 100, 1)).await;
    mailbox.deliver(requested_envelope(71, 1, 100, 2)).await;

    // The router wakes on delivery and drains the batch.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if h.listener.pending_request_ids().await.len() == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "router did not drain the mailbox in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(mailbox.is_empty().await);

    h.listener.close().await.expect("close");
}

#[tokio::test]
async fn stop_leaves_unfinished_requests_unconsumed() {
    let h = Harness::new(3).await;
    h.set_balance(1, 1_000);
    h.listener.clone().start().await.expect("start");

    let envelope = requested_envelope(72, 1, 100, 1);
    let (block_hash, log_index) = envelope.consumed_key().unwrap();
    h.listener.mailbox().deliver(envelope).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.listener.close().await.expect("close");

    // Nothing was eligible before the stop: the log stays unconsumed so a
    // restarted instance gets it re-delivered.
    assert!(!h.db.was_log_consumed(block_hash, log_index).await.unwrap());
    assert_eq!(h.eth_tx_count().await, 0);
}
