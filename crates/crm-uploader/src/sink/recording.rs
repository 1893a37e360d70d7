//! Scriptable in-process sink
//!
//! Records every attempt and can be told to reject specific customers a fixed
//! number of times, or to take a while per upload. Used by tests and the
//! dry-run mode of the binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use crm_common::{Customer, RecordKey};

use super::RemoteSink;
use crate::error::SinkError;

#[derive(Debug, Default)]
struct Script {
    failures: HashMap<RecordKey, u32>,
    attempts: HashMap<RecordKey, u32>,
    accepted: Vec<RecordKey>,
}

/// [`RemoteSink`] that accepts everything unless scripted otherwise
#[derive(Debug, Default)]
pub struct RecordingSink {
    script: Mutex<Script>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every upload
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject the next `times` uploads of `key`
    pub fn fail_times(&self, key: RecordKey, times: u32) {
        self.lock().failures.insert(key, times);
    }

    pub fn attempts(&self, key: RecordKey) -> u32 {
        self.lock().attempts.get(&key).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.lock().attempts.values().sum()
    }

    /// Keys accepted so far, in completion order
    pub fn accepted(&self) -> Vec<RecordKey> {
        self.lock().accepted.clone()
    }

    /// Highest number of uploads observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteSink for RecordingSink {
    async fn upload(&self, customer: &Customer) -> Result<(), SinkError> {
        let key = RecordKey(customer.id);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = {
            let mut script = self.lock();
            *script.attempts.entry(key).or_insert(0) += 1;

            match script.failures.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(SinkError::Rejected(format!("scripted failure for {key}")))
                },
                _ => {
                    script.accepted.push(key);
                    Ok(())
                },
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
