//! Domain types shared by the uploader and its collaborators

use serde::{Deserialize, Serialize};

/// Identifier of a staged record.
///
/// Opaque to the scheduler; only the record source interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(pub i64);

impl RecordKey {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordKey {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A CRM customer as stored in the staging database and posted to the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl Customer {
    pub fn new(
        id: i64,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            phone: phone.into(),
        }
    }
}

/// A record selected from the staging store that has not been delivered yet.
///
/// Created by the record source on every poll and consumed by exactly one
/// upload worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub key: RecordKey,
    pub payload: Customer,
}

impl PendingRecord {
    pub fn new(key: RecordKey, payload: Customer) -> Self {
        Self { key, payload }
    }
}

impl From<Customer> for PendingRecord {
    fn from(customer: Customer) -> Self {
        Self {
            key: RecordKey(customer.id),
            payload: customer,
        }
    }
}
