// SPDX-License-Identifier: MIT
// Fulfillment-pass behavior: budget accounting, reserved-link subtraction,
// commitment short-circuit and retry semantics, against an in-memory store.

mod common;

use alloy::primitives::{B256, U256};
use common::*;

#[tokio::test]
async fn balance_break_keeps_later_requests_pending() {
    let h = Harness::new(3).await;
    h.set_balance(1, 1_000);
    h.set_cost(1, 600);
    h.set_cost(2, 500);

    h.listener.handle_log(requested_envelope(1, 1, 100, 1)).await;
    h.listener.handle_log(requested_envelope(2, 1, 100, 2)).await;

    // Not enough confirmations yet.
    h.set_tip(102);
    h.listener.process_pending_requests().await;
    assert_eq!(h.eth_tx_count().await, 0);

    // Both eligible: the first fits (1000 >= 600), the remaining 400 cannot
    // cover the second, so the pass breaks and keeps it pending.
    h.set_tip(103);
    h.listener.process_pending_requests().await;
    assert_eq!(h.eth_tx_count().await, 1);
    assert_eq!(
        h.listener.pending_request_ids().await,
        vec![U256::from(2u64)]
    );

    // Next tick the enqueued 600 is reserved in the store: 1000 - 600 < 500,
    // still waiting for a top-up.
    h.listener.process_pending_requests().await;
    assert_eq!(h.eth_tx_count().await, 1);

    // A top-up unblocks it.
    h.set_balance(1, 1_200);
    h.listener.process_pending_requests().await;
    assert_eq!(h.eth_tx_count().await, 2);
    assert!(h.listener.pending_request_ids().await.is_empty());
}

#[tokio::test]
async fn preexisting_reservations_shrink_the_budget() {
    let h = Harness::new(3).await;
    h.set_balance(1, 1_000);
    h.set_cost(3, 800);

    // An unmined fulfillment from a prior run still reserves 300.
    sqlx::query(
        "INSERT INTO eth_txes (from_address, to_address, encoded_payload, gas_limit, state, max_link) \
         VALUES (?, ?, X'00', 1, 'in_progress', '300')",
    )
    .bind(FROM.to_string())
    .bind(COORDINATOR.to_string())
    .execute(h.db.pool())
    .await
    .unwrap();

    h.listener.handle_log(requested_envelope(3, 1, 100, 1)).await;
    h.set_tip(103);
    h.listener.process_pending_requests().await;

    // Effective balance 700 < 800: nothing new was enqueued.
    assert_eq!(h.eth_tx_count().await, 1);
    assert_eq!(
        h.listener.pending_request_ids().await,
        vec![U256::from(3u64)]
    );
}

#[tokio::test]
async fn pass_spends_at_most_the_simulated_costs() {
    let h = Harness::new(3).await;
    h.set_balance(1, 2_000);
    h.set_cost(4, 600);
    h.set_cost(5, 500);

    h.listener.handle_log(requested_envelope(4, 1, 100, 1)).await;
    h.listener.handle_log(requested_envelope(5, 1, 100, 2)).await;
    h.set_tip(103);
    h.listener.process_pending_requests().await;

    assert_eq!(h.eth_tx_count().await, 2);
    assert_eq!(
        h.db.reserved_link(FROM).await.unwrap(),
        U256::from(1_100u64)
    );
    assert!(h.listener.pending_request_ids().await.is_empty());
}

#[tokio::test]
async fn zero_commitment_consumes_without_enqueue() {
    let h = Harness::new(3).await;
    h.set_balance(1, 1_000);
    h.coordinator
        .commitments
        .lock()
        .unwrap()
        .insert(U256::from(6u64), B256::ZERO);

    let envelope = requested_envelope(6, 1, 100, 1);
    let (block_hash, log_index) = envelope.consumed_key().unwrap();
    h.listener.handle_log(envelope).await;

    h.set_tip(103);
    h.listener.process_pending_requests().await;

    assert_eq!(h.eth_tx_count().await, 0);
    assert!(h.simulated_ids().await.is_empty());
    assert!(h.db.was_log_consumed(block_hash, log_index).await.unwrap());
    assert!(h.listener.pending_request_ids().await.is_empty());
}

#[tokio::test]
async fn transient_simulation_failure_retries_next_tick() {
    let h = Harness::new(3).await;
    h.set_balance(1, 1_000);
    h.set_cost(7, 100);
    h.pipeline.failing.lock().unwrap().insert(U256::from(7u64));

    h.listener.handle_log(requested_envelope(7, 1, 100, 1)).await;
    h.set_tip(103);
    h.listener.process_pending_requests().await;

    assert_eq!(h.eth_tx_count().await, 0);
    assert_eq!(
        h.listener.pending_request_ids().await,
        vec![U256::from(7u64)]
    );

    // Two minutes later the pipeline recovers; enqueued exactly once.
    h.pipeline.failing.lock().unwrap().clear();
    h.listener.process_pending_requests().await;
    assert_eq!(h.eth_tx_count().await, 1);
    assert!(h.listener.pending_request_ids().await.is_empty());
}

#[tokio::test]
async fn requests_are_simulated_in_insertion_order() {
    let h = Harness::new(3).await;
    h.set_balance(1, 10_000);

    // Later blocks delivered first still simulate in arrival order.
    h.listener.handle_log(requested_envelope(12, 1, 101, 1)).await;
    h.listener.handle_log(requested_envelope(11, 1, 100, 2)).await;
    h.listener.handle_log(requested_envelope(13, 1, 101, 3)).await;

    h.set_tip(200);
    h.listener.process_pending_requests().await;
    assert_eq!(h.simulated_ids().await, vec![12, 11, 13]);
}

#[tokio::test]
async fn each_subscription_draws_on_its_own_balance() {
    let h = Harness::new(3).await;
    h.set_balance(1, 50);
    h.set_balance(2, 1_000);
    h.set_cost(14, 600);
    h.set_cost(15, 600);

    h.listener.handle_log(requested_envelope(14, 1, 100, 1)).await;
    h.listener.handle_log(requested_envelope(15, 2, 100, 2)).await;
    h.set_tip(103);
    h.listener.process_pending_requests().await;

    // Sub 1 cannot afford its request; sub 2 can.
    assert_eq!(h.eth_tx_count().await, 1);
    assert_eq!(
        h.listener.pending_request_ids().await,
        vec![U256::from(14u64)]
    );
}

#[tokio::test]
async fn unreadable_subscription_does_not_starve_the_others() {
    let h = Harness::new(3).await;
    h.set_balance(1, 1_000);
    h.set_balance(2, 1_000);
    h.coordinator.unreadable_subs.lock().unwrap().insert(1);

    h.listener.handle_log(requested_envelope(16, 1, 100, 1)).await;
    h.listener.handle_log(requested_envelope(17, 2, 100, 2)).await;
    h.set_tip(103);
    h.listener.process_pending_requests().await;

    // Sub 1's balance read failed: its request waits. Sub 2 still ran.
    assert_eq!(h.simulated_ids().await, vec![17]);
    assert_eq!(h.eth_tx_count().await, 1);
    assert_eq!(
        h.listener.pending_request_ids().await,
        vec![U256::from(16u64)]
    );

    // Recovery on a later tick.
    h.coordinator.unreadable_subs.lock().unwrap().clear();
    h.listener.process_pending_requests().await;
    assert_eq!(h.eth_tx_count().await, 2);
    assert!(h.listener.pending_request_ids().await.is_empty());
}
