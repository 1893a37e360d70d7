//! Bounded dispatch queue between the scheduler and the upload workers
//!
//! Backed by a bounded MPMC channel: the scheduler blocks when the queue is
//! full and every worker pulls from the same receiver. Both sides observe the
//! shutdown token so neither can hang a stopping uploader.
//!
//! A record is claimed from the moment it is enqueued until its worker
//! releases it after the upload attempt. Enqueueing a claimed key is skipped,
//! so a dispatch cycle never duplicates a record that is still queued or in
//! flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crm_common::{PendingRecord, RecordKey};
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;

type Claims = Arc<Mutex<HashSet<RecordKey>>>;

fn lock(claims: &Claims) -> MutexGuard<'_, HashSet<RecordKey>> {
    claims.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a queue holding at most `capacity` records.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn dispatch_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = async_channel::bounded(capacity);
    let claims = Claims::default();
    (
        QueueSender {
            tx,
            claims: claims.clone(),
        },
        QueueReceiver { rx, claims },
    )
}

/// Producer handle, held by the dispatcher
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: async_channel::Sender<PendingRecord>,
    claims: Claims,
}

impl QueueSender {
    /// Hand a record to the workers, waiting while the queue is full.
    ///
    /// Returns `Ok(false)` without queueing when the record is already
    /// claimed by an earlier enqueue.
    pub async fn enqueue(
        &self,
        record: PendingRecord,
        cancel: &CancellationToken,
    ) -> Result<bool, QueueError> {
        let key = record.key;
        if !lock(&self.claims).insert(key) {
            return Ok(false);
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            sent = self.tx.send(record) => sent.map_err(|_| QueueError::Closed),
        };

        match sent {
            Ok(()) => Ok(true),
            Err(e) => {
                lock(&self.claims).remove(&key);
                Err(e)
            },
        }
    }

    /// Records queued or in flight
    pub fn claimed(&self) -> usize {
        lock(&self.claims).len()
    }

    /// Close the queue. Workers drain nothing further once cancelled and exit
    /// when they find it closed and empty.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

/// Consumer handle, cloned into every worker
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: async_channel::Receiver<PendingRecord>,
    claims: Claims,
}

impl QueueReceiver {
    /// Take the next record.
    ///
    /// Returns `None` once `cancel` fires (checked before the queue, so
    /// nothing is dequeued after cancellation) or the queue is closed and
    /// drained.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<PendingRecord> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            received = self.rx.recv() => received.ok(),
        }
    }

    /// Drop the claim on `key` once its upload attempt is over.
    pub fn release(&self, key: &RecordKey) {
        lock(&self.claims).remove(key);
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crm_common::Customer;
    use std::time::Duration;
    use tokio::time::timeout;

    fn record(id: i64) -> PendingRecord {
        PendingRecord::from(Customer::new(id, "first", "last", format!("{id}@example.com"), "555"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_blocks_producer_until_dequeue() {
        let (tx, rx) = dispatch_queue(2);
        let cancel = CancellationToken::new();

        tx.enqueue(record(1), &cancel).await.unwrap();
        tx.enqueue(record(2), &cancel).await.unwrap();
        assert_eq!(tx.len(), 2);

        let producer = tx.clone();
        let producer_cancel = cancel.clone();
        let third = tokio::spawn(async move { producer.enqueue(record(3), &producer_cancel).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!third.is_finished(), "third enqueue should wait for space");
        assert_eq!(rx.len(), 2);

        let first = rx.dequeue(&cancel).await.unwrap();
        assert_eq!(first.key.get(), 1);

        timeout(Duration::from_secs(1), third).await.unwrap().unwrap().unwrap();
        assert_eq!(rx.len(), 2);
    }

    #[tokio::test]
    async fn test_preserves_fifo_order() {
        let (tx, rx) = dispatch_queue(4);
        let cancel = CancellationToken::new();
        for id in 1..=3 {
            tx.enqueue(record(id), &cancel).await.unwrap();
        }

        let mut keys = Vec::new();
        while !rx.is_empty() {
            keys.push(rx.dequeue(&cancel).await.unwrap().key.get());
        }
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dequeue_after_cancel_returns_none_even_with_items() {
        let (tx, rx) = dispatch_queue(2);
        let cancel = CancellationToken::new();
        tx.enqueue(record(1), &cancel).await.unwrap();

        cancel.cancel();
        assert!(rx.dequeue(&cancel).await.is_none());
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_blocked_producer() {
        let (tx, _rx) = dispatch_queue(1);
        let cancel = CancellationToken::new();
        tx.enqueue(record(1), &cancel).await.unwrap();

        let producer = tx.clone();
        let producer_cancel = cancel.clone();
        let blocked = tokio::spawn(async move { producer.enqueue(record(2), &producer_cancel).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(blocked.await.unwrap(), Err(QueueError::Cancelled));
    }

    #[tokio::test]
    async fn test_closed_queue_ends_consumers() {
        let (tx, rx) = dispatch_queue(1);
        let cancel = CancellationToken::new();
        assert!(tx.close());
        assert!(rx.dequeue(&cancel).await.is_none());
        assert_eq!(tx.enqueue(record(1), &cancel).await, Err(QueueError::Closed));
        assert_eq!(tx.capacity(), 1);
        assert_eq!(tx.claimed(), 0);
    }

    #[tokio::test]
    async fn test_claimed_record_is_not_queued_twice() {
        let (tx, rx) = dispatch_queue(4);
        let cancel = CancellationToken::new();

        assert_eq!(tx.enqueue(record(1), &cancel).await, Ok(true));
        assert_eq!(tx.enqueue(record(1), &cancel).await, Ok(false));
        assert_eq!(rx.len(), 1);

        let taken = rx.dequeue(&cancel).await.unwrap();
        assert_eq!(tx.enqueue(record(1), &cancel).await, Ok(false));

        rx.release(&taken.key);
        assert_eq!(tx.claimed(), 0);
        assert_eq!(tx.enqueue(record(1), &cancel).await, Ok(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_enqueue_drops_claim() {
        let (tx, _rx) = dispatch_queue(1);
        let cancel = CancellationToken::new();
        tx.enqueue(record(1), &cancel).await.unwrap();

        cancel.cancel();
        assert_eq!(tx.enqueue(record(2), &cancel).await, Err(QueueError::Cancelled));
        assert_eq!(tx.claimed(), 1);
    }
}
