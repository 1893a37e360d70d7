//! Uploader service: wiring, start and graceful stop
//!
//! [`Uploader::start`] spawns one scheduler task and a fixed pool of upload
//! workers connected by the dispatch queue. The returned [`UploaderHandle`]
//! accepts wake-up signals and performs the shutdown: cancel, close the
//! queue, then wait for the loop and every in-flight upload to finish.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backoff::{Backoff, DEFAULT_BACKOFF_UNIT};
use crate::dispatch::Dispatcher;
use crate::error::SignalError;
use crate::queue::{dispatch_queue, QueueSender};
use crate::scheduler::{status_channel, Scheduler, SchedulerStatus};
use crate::signal::ListenerState;
use crate::sink::RemoteSink;
use crate::source::RecordSource;
use crate::wake::{signal_slot, SignalSender, WakeCoordinator};
use crate::worker::{UploadStats, UploadStatsSnapshot, WorkerContext, WorkerPool};

/// Maximum number of uploads running at one time.
pub const DEFAULT_POOL_SIZE: usize = 25;

/// Delay before the first polling trigger.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Ceiling for the polling interval.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(600);

/// Scheduler and pool tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Concurrent upload workers
    pub pool_size: usize,
    /// Dispatch queue capacity
    pub queue_capacity: usize,
    /// Delay before the first timer trigger
    pub initial_interval: Duration,
    /// Length of one backoff step
    pub backoff_unit: Duration,
    /// Ceiling for backoff intervals, `None` for unbounded
    pub backoff_max: Option<Duration>,
    /// Wake on the timer as well as on external signals
    pub polling_enabled: bool,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            queue_capacity: DEFAULT_POOL_SIZE,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            backoff_max: Some(DEFAULT_BACKOFF_MAX),
            polling_enabled: true,
        }
    }
}

impl UploaderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_size == 0 {
            anyhow::bail!("Uploader pool_size must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("Uploader queue_capacity must be greater than 0");
        }
        if self.backoff_unit.is_zero() {
            anyhow::bail!("Uploader backoff_unit must be greater than 0");
        }
        if !self.polling_enabled {
            tracing::warn!("Polling fallback disabled - uploads only start on external signals");
        }
        Ok(())
    }

    fn backoff(&self) -> Backoff {
        let backoff = Backoff::new(self.backoff_unit);
        match self.backoff_max {
            Some(max) => backoff.with_max_interval(max),
            None => backoff,
        }
    }
}

/// Uploader with its collaborators injected, not yet running
pub struct Uploader {
    config: UploaderConfig,
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn RemoteSink>,
}

impl Uploader {
    pub fn new(
        config: UploaderConfig,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RemoteSink>,
    ) -> Self {
        Self {
            config,
            source,
            sink,
        }
    }

    /// Validate the configuration, then spawn the scheduler and worker pool
    /// on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime.
    pub fn start(self) -> anyhow::Result<UploaderHandle> {
        self.config.validate()?;
        let config = self.config;
        let cancel = CancellationToken::new();
        let stats = Arc::new(UploadStats::default());

        let (signals, signal_rx) = signal_slot();
        let (successes, success_rx) = signal_slot();
        let (queue_tx, queue_rx) = dispatch_queue(config.queue_capacity);
        let (status_tx, status_rx) = status_channel(config.initial_interval);

        let workers = WorkerPool::spawn(
            config.pool_size,
            queue_rx,
            WorkerContext {
                source: self.source.clone(),
                sink: self.sink,
                successes,
                stats: stats.clone(),
            },
            cancel.clone(),
        );

        let scheduler = Scheduler::new(
            WakeCoordinator::new(signal_rx, config.initial_interval, config.polling_enabled),
            success_rx,
            config.backoff(),
            Dispatcher::new(self.source, queue_tx.clone()),
            status_tx,
        );
        let scheduler = tokio::spawn(scheduler.run(cancel.clone()));

        info!(
            pool_size = config.pool_size,
            queue_capacity = config.queue_capacity,
            polling = config.polling_enabled,
            "Uploader started"
        );

        Ok(UploaderHandle {
            signals,
            cancel,
            queue: queue_tx,
            scheduler,
            workers,
            status: status_rx,
            stats,
        })
    }
}

/// Control handle for a running uploader
pub struct UploaderHandle {
    signals: SignalSender,
    cancel: CancellationToken,
    queue: QueueSender,
    scheduler: JoinHandle<()>,
    workers: WorkerPool,
    status: watch::Receiver<SchedulerStatus>,
    stats: Arc<UploadStats>,
}

impl UploaderHandle {
    /// Ask the scheduler to look for work now. Never blocks.
    pub fn notify(&self) -> Result<(), SignalError> {
        self.signals.notify()
    }

    /// Sender for external signal transports
    pub fn signaler(&self) -> SignalSender {
        self.signals.clone()
    }

    pub fn status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    pub fn stats(&self) -> UploadStatsSnapshot {
        self.stats.snapshot()
    }

    /// Handler state for the HTTP signal listener
    pub fn listener_state(&self) -> ListenerState {
        ListenerState::new(self.signals.clone(), self.status.clone(), self.stats.clone())
    }

    /// Token cancelled when the uploader begins stopping
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stop the scheduler and wait for every worker to finish its current
    /// upload. Records still queued stay pending in the source.
    pub async fn stop(self) {
        info!("Stopping uploader");
        self.cancel.cancel();
        self.queue.close();

        if let Err(e) = self.scheduler.await {
            error!(error = %e, "Scheduler task terminated abnormally");
        }
        self.workers.join().await;

        info!(uploaded = self.stats.snapshot().uploaded, "Uploader stopped");
    }
}
