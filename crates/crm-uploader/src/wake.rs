//! Wake-up signals and the trigger stream
//!
//! A [`signal_slot`] is a single-slot mailbox: producers call
//! [`SignalSender::notify`], which never blocks and reports
//! [`SignalError::Busy`] when a signal is already waiting. The same primitive
//! carries external "work may be ready" signals and the workers' success
//! notices.
//!
//! [`WakeCoordinator`] merges external signals with the polling timer into one
//! stream of [`Trigger`]s for the scheduler loop.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::time::{sleep, Instant, Sleep};
use tokio_util::sync::CancellationToken;

use crate::error::SignalError;

/// Create a coalescing single-slot mailbox.
pub fn signal_slot() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (SignalSender { tx }, SignalReceiver { rx })
}

/// Producer side of a signal slot. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<()>,
}

impl SignalSender {
    /// Post a signal without waiting.
    ///
    /// Returns `Busy` if one is already pending (this one is dropped) and
    /// `Closed` once the receiving side is gone.
    pub fn notify(&self) -> Result<(), SignalError> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => Err(SignalError::Busy),
            Err(TrySendError::Closed(())) => Err(SignalError::Closed),
        }
    }

    /// Post a signal, treating an already pending one as success.
    pub fn notify_coalesced(&self) {
        let _ = self.notify();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a signal slot
#[derive(Debug)]
pub struct SignalReceiver {
    rx: mpsc::Receiver<()>,
}

impl SignalReceiver {
    /// Wait for the next signal. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Take a pending signal if there is one.
    pub fn try_take(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }
}

/// Why the scheduler woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An external writer signalled new work
    Signal,
    /// The polling timer elapsed
    Timer,
}

/// Merges external signals with the polling timer.
pub struct WakeCoordinator {
    signals: SignalReceiver,
    timer: Pin<Box<Sleep>>,
    polling_enabled: bool,
}

impl WakeCoordinator {
    /// `initial` is the delay before the first timer trigger. With polling
    /// disabled the timer never fires and only signals wake the loop.
    pub fn new(signals: SignalReceiver, initial: Duration, polling_enabled: bool) -> Self {
        Self {
            signals,
            timer: Box::pin(sleep(initial)),
            polling_enabled,
        }
    }

    /// Wait for the next trigger, or `None` once `cancel` fires.
    ///
    /// Cancellation wins over a simultaneously ready trigger.
    pub async fn next_trigger(&mut self, cancel: &CancellationToken) -> Option<Trigger> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            Some(()) = self.signals.recv() => Some(Trigger::Signal),
            _ = self.timer.as_mut(), if self.polling_enabled => Some(Trigger::Timer),
        }
    }

    /// Arm the timer to fire `after` from now, replacing any earlier deadline.
    pub fn rearm(&mut self, after: Duration) {
        self.timer.as_mut().reset(Instant::now() + after);
    }

    /// When the polling timer fires next
    pub fn deadline(&self) -> Instant {
        self.timer.deadline()
    }

    pub fn polling_enabled(&self) -> bool {
        self.polling_enabled
    }
}
