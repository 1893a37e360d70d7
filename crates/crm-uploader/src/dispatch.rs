//! One dispatch cycle: find pending records and queue them for upload

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::queue::QueueSender;
use crate::source::RecordSource;

/// Moves pending records from the source onto the dispatch queue
pub struct Dispatcher {
    source: Arc<dyn RecordSource>,
    queue: QueueSender,
}

impl Dispatcher {
    pub fn new(source: Arc<dyn RecordSource>, queue: QueueSender) -> Self {
        Self { source, queue }
    }

    /// Queue every currently pending record and return how many were queued.
    ///
    /// Records still queued or in flight from an earlier cycle are skipped.
    /// Blocks while the queue is full. A failed selection is logged and
    /// abandoned; the next trigger selects again and picks up whatever is
    /// still pending.
    pub async fn dispatch(&self, cancel: &CancellationToken) -> usize {
        let records = match self.source.select_pending().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Error getting pending records for upload");
                return 0;
            },
        };

        if records.is_empty() {
            debug!("No pending records");
            return 0;
        }

        let total = records.len();
        info!(count = total, "Processing pending records");

        let mut queued = 0;
        let mut skipped = 0;
        for record in records {
            let key = record.key;
            match self.queue.enqueue(record, cancel).await {
                Ok(true) => queued += 1,
                Ok(false) => skipped += 1,
                Err(QueueError::Cancelled) => {
                    debug!(key = %key, queued, total, "Dispatch interrupted by shutdown");
                    break;
                },
                Err(QueueError::Closed) => {
                    warn!(key = %key, queued, total, "Dispatch queue closed");
                    break;
                },
            }
        }

        debug!(queued, skipped, total, "Dispatch done");
        queued
    }

    pub fn queue(&self) -> &QueueSender {
        &self.queue
    }
}
