//! Record sources
//!
//! A record source is the staging store the uploader drains. It answers two
//! questions: which records are still pending, and "this one is delivered
//! now". Implementations must tolerate concurrent calls from every worker.

use async_trait::async_trait;
use crm_common::{PendingRecord, RecordKey};

use crate::error::SourceError;

pub mod memory;
pub mod postgres;

pub use memory::InMemorySource;
pub use postgres::PgRecordSource;

/// Staging store holding records awaiting upload
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// All records not yet marked delivered, in selection order.
    async fn select_pending(&self) -> Result<Vec<PendingRecord>, SourceError>;

    /// Flag a record as delivered so later selections skip it.
    async fn mark_delivered(&self, key: &RecordKey) -> Result<(), SourceError>;
}
