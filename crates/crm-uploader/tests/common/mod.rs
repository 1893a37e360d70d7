//! Shared helpers for uploader integration tests

#![allow(dead_code, clippy::unwrap_used)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crm_common::{Customer, RecordKey};
use crm_uploader::error::SinkError;
use crm_uploader::RemoteSink;
use tokio::sync::Semaphore;

pub fn customer(id: i64) -> Customer {
    Customer::new(
        id,
        format!("First{id}"),
        format!("Last{id}"),
        format!("customer{id}@example.com"),
        format!("555-01{id:02}"),
    )
}

pub fn customers(n: i64) -> Vec<Customer> {
    (1..=n).map(customer).collect()
}

pub fn keys(n: i64) -> impl Iterator<Item = RecordKey> {
    (1..=n).map(RecordKey)
}

/// Poll `condition` every 10ms until it holds, panicking after `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("condition not met within {limit:?}"));
}

/// Await `future`, panicking after `limit`.
pub async fn within<T>(limit: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, future)
        .await
        .unwrap_or_else(|_| panic!("future did not complete within {limit:?}"))
}

/// Sink whose uploads block until the test opens the gate
pub struct GatedSink {
    gate: Semaphore,
    calls: AtomicUsize,
    finished: AtomicUsize,
}

impl GatedSink {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// Let every current and future upload through
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    /// Uploads started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Uploads that got through the gate
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSink for GatedSink {
    async fn upload(&self, _customer: &Customer) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.unwrap();
        permit.forget();
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
