//! Shutdown-safe synchronization helpers
//!
//! Both types exist for the same reason: during pipeline collapse, a
//! wait-group watcher and an explicit close may race, and neither side may
//! panic or close twice.

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

/// Counter of active participants with an awaitable zero crossing.
///
/// The pipeline keeps one per stream side (L/R x writers/readers); stages
/// register on start and deregister on exit, and a watcher task closes the
/// corresponding stream side when the count reaches zero.
#[derive(Debug, Clone)]
pub struct WaitGroup {
    count: watch::Sender<i64>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    /// Adjust the participant count by `delta` (may be negative)
    pub fn add(&self, delta: i64) {
        self.count.send_modify(|c| *c += delta);
    }

    /// Mark one participant done
    #[inline]
    pub fn done(&self) {
        self.add(-1);
    }

    /// Current participant count
    pub fn count(&self) -> i64 {
        *self.count.borrow()
    }

    /// Wait until the count drops to zero or below.
    ///
    /// Returns immediately if nobody ever registered.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // wait_for checks the current value first, so no update is missed
        let _ = rx.wait_for(|c| *c <= 0).await;
    }
}

/// Bounded sender whose close is idempotent and whose post-close sends
/// return `false` instead of erroring or panicking.
///
/// Used for the adapter egress channel and the event bus, where a shutdown
/// watcher and an explicit close can race.
#[derive(Debug)]
pub struct ClosableSender<T> {
    inner: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T> ClosableSender<T> {
    /// Create a bounded channel; the receiver sees `None` after close once
    /// the queue is drained.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                inner: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Send one value, waiting for capacity. Returns `false` if the channel
    /// is (or becomes) closed.
    pub async fn send(&self, value: T) -> bool {
        let tx = self.inner.lock().clone();
        match tx {
            Some(tx) => tx.send(value).await.is_ok(),
            None => false,
        }
    }

    /// Close the channel. Safe to call any number of times, from any task.
    pub fn close(&self) {
        self.inner.lock().take();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_group_zero_is_immediate() {
        let wg = WaitGroup::new();
        wg.wait().await;
    }

    #[tokio::test]
    async fn test_wait_group_releases_on_last_done() {
        let wg = WaitGroup::new();
        wg.add(2);

        let waiter = {
            let wg = wg.clone();
            tokio::spawn(async move { wg.wait().await })
        };

        wg.done();
        assert!(!waiter.is_finished());
        wg.done();
        waiter.await.unwrap();
        assert_eq!(wg.count(), 0);
    }

    #[tokio::test]
    async fn test_closable_sender_double_close() {
        let (tx, mut rx) = ClosableSender::new(4);
        assert!(tx.send(1u32).await);

        tx.close();
        tx.close(); // no-op
        assert!(tx.is_closed());
        assert!(!tx.send(2).await);

        // queued value still drains
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }
}
