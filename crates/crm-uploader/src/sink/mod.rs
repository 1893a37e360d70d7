//! Remote sinks
//!
//! A sink delivers one customer to the remote CRM. Success is whatever the
//! sink's own acknowledgement rule says; every other outcome is a
//! [`SinkError`] and leaves the record pending.

use async_trait::async_trait;
use crm_common::Customer;

use crate::error::SinkError;

pub mod http;
pub mod recording;

pub use http::HttpSink;
pub use recording::RecordingSink;

/// Destination for uploaded records
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn upload(&self, customer: &Customer) -> Result<(), SinkError>;
}
