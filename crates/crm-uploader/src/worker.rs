//! Upload worker pool
//!
//! A fixed number of tasks drain the dispatch queue. Each performs one upload
//! attempt per record: post to the sink, mark the record delivered, then post
//! a success notice for the scheduler. Failures are logged and dropped; the
//! record is still pending and the next dispatch cycle picks it up again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crm_common::PendingRecord;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::queue::QueueReceiver;
use crate::sink::RemoteSink;
use crate::source::RecordSource;
use crate::wake::SignalSender;

/// Counters shared by all workers
#[derive(Debug, Default)]
pub struct UploadStats {
    uploaded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`UploadStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStatsSnapshot {
    pub uploaded: u64,
    pub failed: u64,
}

impl UploadStats {
    pub fn snapshot(&self) -> UploadStatsSnapshot {
        UploadStatsSnapshot {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Everything a worker needs besides the queue
#[derive(Clone)]
pub struct WorkerContext {
    pub source: Arc<dyn RecordSource>,
    pub sink: Arc<dyn RemoteSink>,
    pub successes: SignalSender,
    pub stats: Arc<UploadStats>,
}

/// A single upload executor
pub struct UploadWorker {
    id: usize,
    queue: QueueReceiver,
    ctx: WorkerContext,
}

impl UploadWorker {
    pub fn new(id: usize, queue: QueueReceiver, ctx: WorkerContext) -> Self {
        Self { id, queue, ctx }
    }

    /// Drain the queue until it closes or `cancel` fires.
    ///
    /// An upload already in progress always runs to completion.
    pub async fn run(self, cancel: CancellationToken) {
        debug!(worker = self.id, "Upload worker started");
        while let Some(record) = self.queue.dequeue(&cancel).await {
            let key = record.key;
            self.process(record).await;
            self.queue.release(&key);
        }
        debug!(worker = self.id, "Upload worker stopped");
    }

    /// One upload attempt. Returns whether the record was delivered.
    pub async fn process(&self, record: PendingRecord) -> bool {
        let key = record.key;
        match self.attempt(&record).await {
            Ok(()) => {
                self.ctx.stats.uploaded.fetch_add(1, Ordering::Relaxed);
                self.ctx.successes.notify_coalesced();
                debug!(worker = self.id, key = %key, "Record uploaded");
                true
            },
            Err(e) => {
                self.ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = self.id, key = %key, error = %e, "Upload failed, record stays pending");
                false
            },
        }
    }

    async fn attempt(&self, record: &PendingRecord) -> Result<(), UploadError> {
        self.ctx.sink.upload(&record.payload).await?;
        self.ctx.source.mark_delivered(&record.key).await?;
        Ok(())
    }
}

/// The running set of upload workers
pub struct WorkerPool {
    tasks: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `size` workers sharing `queue`.
    pub fn spawn(
        size: usize,
        queue: QueueReceiver,
        ctx: WorkerContext,
        cancel: CancellationToken,
    ) -> Self {
        let mut tasks = JoinSet::new();
        for id in 0..size {
            let worker = UploadWorker::new(id, queue.clone(), ctx.clone());
            tasks.spawn(worker.run(cancel.clone()));
        }
        info!(workers = size, "Upload worker pool started");
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Upload worker terminated abnormally");
            }
        }
        info!("Upload worker pool stopped");
    }
}
