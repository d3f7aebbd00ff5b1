//! Bounded FIFO queue shared between submitters and workers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};

/// Returned by [`TaskQueue::push`] once the queue has been closed.
/// Carries the rejected item back to the caller.
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is closed")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Registration of a receiver parked in `pop`.
/// Dropping it (item taken, queue closed, or `pop` cancelled) withdraws the slot.
struct ParkedReceiver<'a> {
    idle: &'a AtomicUsize,
}

impl<'a> ParkedReceiver<'a> {
    fn register(idle: &'a AtomicUsize) -> Self {
        idle.fetch_add(1, Ordering::AcqRel);
        Self { idle }
    }
}

impl Drop for ParkedReceiver<'_> {
    fn drop(&mut self) {
        self.idle.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded multi-producer multi-consumer queue.
///
/// Behaves like a buffered channel: `push` waits while `capacity` items are
/// already buffered and no receiver is parked in `pop`. With `capacity == 0`
/// every push is a hand-off to a waiting receiver.
///
/// Closing is one-way. After `close`, `push` fails and `pop` keeps returning
/// buffered items until the queue is empty, then `None`.
///
/// Items come out in the order they went in. Pushers that are all waiting on
/// a full queue race for freed room, so their relative order is not kept.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,

    /// Receivers parked in `pop` waiting for an item.
    idle_receivers: AtomicUsize,

    not_empty: Notify,
    not_full: Notify,
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                // grows on demand; capacity may be huge
                items: VecDeque::new(),
                closed: false,
            }),
            capacity,
            idle_receivers: AtomicUsize::new(0),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Append `item`, waiting for room if the queue is full.
    ///
    /// Cancel safe: if the returned future is dropped before it completes,
    /// the item is dropped with it and never becomes visible to receivers.
    ///
    /// Concurrent waiting pushers are not served first-come first-served.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        loop {
            // Registered before the check so a wakeup between the check and
            // the await is not lost.
            let room = self.not_full.notified();
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(QueueClosed(item));
                }
                let limit = self
                    .capacity
                    .saturating_add(self.idle_receivers.load(Ordering::Acquire));
                if state.items.len() < limit {
                    state.items.push_back(item);
                    drop(state);
                    self.not_empty.notify_waiters();
                    return Ok(());
                }
            }
            room.await;
        }
    }

    /// Take the front item, waiting while the queue is empty and open.
    /// Returns `None` once the queue is closed and drained.
    ///
    /// Cancel safe: dropping the future withdraws the receiver, so a
    /// cancelled `pop` never lets a later `push` past the capacity.
    pub async fn pop(&self) -> Option<T> {
        let mut parked: Option<ParkedReceiver<'_>> = None;
        loop {
            let arrival = self.not_empty.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    drop(parked.take());
                    drop(state);
                    self.not_full.notify_waiters();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
                if parked.is_none() {
                    // a parked receiver makes room for one more hand-off
                    parked = Some(ParkedReceiver::register(&self.idle_receivers));
                    drop(state);
                    self.not_full.notify_waiters();
                }
            }
            arrival.await;
        }
    }

    /// Close the queue. Idempotent.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Remove and return everything still buffered.
    pub async fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.state.lock().await.items.drain(..).collect();
        self.not_full.notify_waiters();
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn pops_in_push_order() {
        let queue = TaskQueue::new(4);
        for i in 1..=3 {
            queue.push(i).await.unwrap();
        }
        assert_eq!(queue.len().await, 3);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
    }

    #[tokio::test]
    async fn push_waits_while_full() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.push(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), queue.push(2)).await;
        assert!(blocked.is_err(), "push into a full queue should wait");
        // the timed out item was dropped, not enqueued
        assert_eq!(queue.len().await, 1);

        let pusher = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.push(3).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        assert_eq!(queue.pop().await, Some(1));
        pusher.await.unwrap().unwrap();
        assert_eq!(queue.pop().await, Some(3));
    }

    #[tokio::test]
    async fn zero_capacity_hands_off_to_parked_receiver() {
        let queue = Arc::new(TaskQueue::new(0));

        let refused = tokio::time::timeout(Duration::from_millis(50), queue.push(1)).await;
        assert!(refused.is_err(), "no receiver is waiting yet");

        let receiver = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop().await }
        });

        tokio::time::timeout(Duration::from_secs(1), queue.push(7))
            .await
            .expect("hand-off should complete once a receiver is parked")
            .unwrap();
        assert_eq!(receiver.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = TaskQueue::new(2);
        queue.push("a").await.unwrap();
        queue.close().await;
        queue.close().await;

        assert!(queue.is_closed().await);
        assert!(matches!(queue.push("b").await, Err(QueueClosed("b"))));
        assert_eq!(queue.pop().await, Some("a"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn close_wakes_parked_receivers() {
        let queue = Arc::new(TaskQueue::<u32>::new(0));
        let receivers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close().await;

        for receiver in receivers {
            assert_eq!(receiver.await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn drain_empties_buffer() {
        let queue = TaskQueue::new(3);
        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();
        assert_eq!(queue.drain().await, vec![1, 2]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn cancelled_pop_does_not_open_hand_off() {
        let queue = TaskQueue::<u32>::new(0);

        let gave_up = tokio::time::timeout(Duration::from_millis(20), queue.pop()).await;
        assert!(gave_up.is_err());

        let pushed = tokio::time::timeout(Duration::from_millis(50), queue.push(1)).await;
        assert!(pushed.is_err(), "hand-off completed with no receiver waiting");
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn unbounded_capacity_does_not_preallocate_or_overflow() {
        let queue = Arc::new(TaskQueue::new(usize::MAX));

        // parked receiver on top of usize::MAX room
        let receiver = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.push(1_u8).await.unwrap();
        queue.push(2).await.unwrap();
        assert_eq!(receiver.await.unwrap(), Some(1));
        assert_eq!(queue.len().await, 1);
    }
}
