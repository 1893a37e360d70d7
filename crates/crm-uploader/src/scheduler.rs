//! Scheduler loop
//!
//! The single task that decides when to look for work. Each iteration:
//!
//! 1. take a pending success notice, if any, and reset the backoff
//! 2. wait for a trigger (external signal or timer) or shutdown
//! 3. on a trigger, dispatch, then rearm the timer with the next backoff
//!    interval, whether or not anything was found
//!
//! The loop owns the [`Backoff`] outright and never stops on a failed cycle;
//! only cancellation ends it.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::dispatch::Dispatcher;
use crate::wake::{SignalReceiver, Trigger, WakeCoordinator};

/// Lifecycle of the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Running,
    Stopping,
    Stopped,
}

/// Snapshot published after every state change or cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Completed trigger/dispatch cycles
    pub cycles: u64,
    /// Records queued across all cycles
    pub dispatched: u64,
    /// Times a success notice reset the backoff
    pub backoff_resets: u64,
    /// Interval the polling timer was last armed with
    pub next_poll: Duration,
}

impl SchedulerStatus {
    fn starting(initial: Duration) -> Self {
        Self {
            state: SchedulerState::Running,
            cycles: 0,
            dispatched: 0,
            backoff_resets: 0,
            next_poll: initial,
        }
    }
}

/// Create the status channel a scheduler publishes to.
pub fn status_channel(
    initial: Duration,
) -> (watch::Sender<SchedulerStatus>, watch::Receiver<SchedulerStatus>) {
    watch::channel(SchedulerStatus::starting(initial))
}

pub struct Scheduler {
    wake: WakeCoordinator,
    successes: SignalReceiver,
    backoff: Backoff,
    dispatcher: Dispatcher,
    status: watch::Sender<SchedulerStatus>,
}

impl Scheduler {
    pub fn new(
        wake: WakeCoordinator,
        successes: SignalReceiver,
        backoff: Backoff,
        dispatcher: Dispatcher,
        status: watch::Sender<SchedulerStatus>,
    ) -> Self {
        Self {
            wake,
            successes,
            backoff,
            dispatcher,
            status,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.status.send_modify(|s| s.state = SchedulerState::Running);
        info!(polling = self.wake.polling_enabled(), "Scheduler started");

        loop {
            if self.successes.try_take() {
                debug!("Upload succeeded, resetting backoff");
                self.backoff.reset();
                self.status.send_modify(|s| s.backoff_resets += 1);
            }

            let Some(trigger) = self.wake.next_trigger(&cancel).await else {
                break;
            };

            match trigger {
                Trigger::Signal => debug!("Received work signal"),
                Trigger::Timer => debug!("Checking for work"),
            }

            let queued = self.dispatcher.dispatch(&cancel).await;
            let wait = self.backoff.next();
            self.wake.rearm(wait);

            self.status.send_modify(|s| {
                s.cycles += 1;
                s.dispatched += queued as u64;
                s.next_poll = wait;
            });
            debug!(queued, next_poll_ms = wait.as_millis() as u64, "Cycle complete");
        }

        self.status.send_modify(|s| s.state = SchedulerState::Stopping);
        info!("Scheduler stopping");
        self.dispatcher.queue().close();
        self.status.send_modify(|s| s.state = SchedulerState::Stopped);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::dispatch_queue;
    use crate::source::InMemorySource;
    use crate::wake::{signal_slot, SignalSender};
    use crm_common::Customer;
    use std::sync::Arc;

    struct Harness {
        signals: SignalSender,
        successes: SignalSender,
        status: watch::Receiver<SchedulerStatus>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(source: Arc<InMemorySource>, polling: bool) -> (Harness, crate::queue::QueueReceiver) {
        let (signal_tx, signal_rx) = signal_slot();
        let (success_tx, success_rx) = signal_slot();
        let (queue_tx, queue_rx) = dispatch_queue(16);
        let (status_tx, status_rx) = status_channel(Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let scheduler = Scheduler::new(
            WakeCoordinator::new(signal_rx, Duration::from_secs(1), polling),
            success_rx,
            Backoff::default(),
            Dispatcher::new(source, queue_tx),
            status_tx,
        );
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        (
            Harness {
                signals: signal_tx,
                successes: success_tx,
                status: status_rx,
                cancel,
                task,
            },
            queue_rx,
        )
    }

    async fn wait_cycles(status: &mut watch::Receiver<SchedulerStatus>, cycles: u64) -> SchedulerStatus {
        status.wait_for(|s| s.cycles >= cycles).await.unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_polls_widen_with_fibonacci_backoff() {
        let (mut h, _queue) = start(Arc::new(InMemorySource::new()), true);

        let mut intervals = Vec::new();
        for cycle in 1..=5 {
            intervals.push(wait_cycles(&mut h.status, cycle).await.next_poll.as_secs());
        }
        assert_eq!(intervals, vec![1, 1, 2, 3, 5]);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_notice_resets_backoff() {
        let (mut h, _queue) = start(Arc::new(InMemorySource::new()), false);

        for cycle in 1..=3 {
            h.signals.notify().unwrap();
            wait_cycles(&mut h.status, cycle).await;
        }
        assert_eq!(h.status.borrow().next_poll, Duration::from_secs(2));

        h.successes.notify().unwrap();
        h.signals.notify().unwrap();
        assert_eq!(wait_cycles(&mut h.status, 4).await.next_poll, Duration::from_secs(3));

        h.signals.notify().unwrap();
        let status = wait_cycles(&mut h.status, 5).await;
        assert_eq!(status.next_poll, Duration::from_secs(1));
        assert_eq!(status.backoff_resets, 1);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_dispatches_pending_records() {
        let source = Arc::new(InMemorySource::with_customers(
            (1..=3).map(|id| Customer::new(id, "f", "l", format!("{id}@x"), "1")),
        ));
        let (mut h, queue) = start(source, false);

        h.signals.notify().unwrap();
        let status = wait_cycles(&mut h.status, 1).await;
        assert_eq!(status.dispatched, 3);
        assert_eq!(queue.len(), 3);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop_and_closes_queue() {
        let (mut h, queue) = start(Arc::new(InMemorySource::new()), true);
        wait_cycles(&mut h.status, 1).await;

        h.cancel.cancel();
        h.task.await.unwrap();

        assert_eq!(h.status.borrow().state, SchedulerState::Stopped);
        assert!(queue.dequeue(&CancellationToken::new()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_source_does_not_stop_loop() {
        let source = Arc::new(InMemorySource::new());
        source.set_unavailable(true);
        let (mut h, _queue) = start(source.clone(), true);

        let status = wait_cycles(&mut h.status, 4).await;
        assert_eq!(status.state, SchedulerState::Running);
        assert!(source.select_calls() >= 4);

        h.cancel.cancel();
        h.task.await.unwrap();
    }
}
