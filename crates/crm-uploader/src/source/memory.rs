//! In-memory staging store
//!
//! Used by tests and local demos. Tracks how many times each record was
//! marked delivered so duplicate deliveries are observable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use crm_common::{Customer, PendingRecord, RecordKey};

use super::RecordSource;
use crate::error::SourceError;

#[derive(Debug)]
struct Entry {
    customer: Customer,
    deliveries: u32,
}

/// Thread-safe in-memory [`RecordSource`]
#[derive(Debug, Default)]
pub struct InMemorySource {
    entries: Mutex<BTreeMap<RecordKey, Entry>>,
    unavailable: AtomicBool,
    selects: AtomicU64,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customers(customers: impl IntoIterator<Item = Customer>) -> Self {
        let source = Self::new();
        for customer in customers {
            source.insert(customer);
        }
        source
    }

    /// Stage a customer as pending. Replaces any record with the same id.
    pub fn insert(&self, customer: Customer) {
        let key = RecordKey(customer.id);
        self.lock().insert(
            key,
            Entry {
                customer,
                deliveries: 0,
            },
        );
    }

    /// Make every call fail with [`SourceError::Unavailable`] until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn pending_count(&self) -> usize {
        self.lock().values().filter(|e| e.deliveries == 0).count()
    }

    pub fn is_delivered(&self, key: RecordKey) -> bool {
        self.deliveries(key) > 0
    }

    /// Number of successful `mark_delivered` calls for `key`.
    pub fn deliveries(&self, key: RecordKey) -> u32 {
        self.lock().get(&key).map_or(0, |e| e.deliveries)
    }

    /// Number of `select_pending` calls served, including failed ones.
    pub fn select_calls(&self) -> u64 {
        self.selects.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RecordKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("in-memory source offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn select_pending(&self) -> Result<Vec<PendingRecord>, SourceError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        Ok(self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.deliveries == 0)
            .map(|(key, entry)| PendingRecord::new(*key, entry.customer.clone()))
            .collect())
    }

    async fn mark_delivered(&self, key: &RecordKey) -> Result<(), SourceError> {
        self.check_available()?;

        let mut entries = self.lock();
        let entry = entries.get_mut(key).ok_or(SourceError::NotFound(*key))?;
        entry.deliveries += 1;
        Ok(())
    }
}
