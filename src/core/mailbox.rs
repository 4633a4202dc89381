// SPDX-License-Identifier: MIT

use std::collections::VecDeque;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify};

/// Default capacity, sized to ride out large log replays.
const HIGH_CAPACITY: usize = 100_000;

#[derive(Clone, Copy, Debug)]
pub struct Delivery {
    pub was_over_capacity: bool,
}

/// Bounded FIFO queue with a single-slot wake notification.
///
/// Producers deliver concurrently; a single consumer drains `retrieve` until
/// empty on each wake. When the queue is over capacity the oldest item is
/// dropped. The consumer must tolerate gaps, the broadcaster re-delivers
/// anything not yet marked consumed.
pub struct Mailbox<T> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn high_capacity() -> Self {
        Self::new(HIGH_CAPACITY)
    }

    pub async fn deliver(&self, item: T) -> Delivery {
        let mut queue = self.queue.lock().await;
        let was_over_capacity = if queue.len() >= self.capacity {
            queue.pop_front();
            true
        } else {
            false
        };
        queue.push_back(item);
        drop(queue);
        self.notify.notify_one();
        Delivery { was_over_capacity }
    }

    pub async fn retrieve(&self) -> Option<T> {
        self.queue.lock().await.pop_front()
    }

    /// Wake signal for the consumer. Create the future before checking the
    /// queue so a delivery between the empty check and the await is not lost.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}
