//! CRM Uploader Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Drains customer records from a staging database into a remote CRM.
//!
//! # Overview
//!
//! - **Scheduler**: a single loop that wakes on an external signal or a
//!   polling timer, dispatches every pending record, then widens the polling
//!   interval along a Fibonacci sequence until an upload succeeds
//! - **Dispatch queue**: a bounded queue between the scheduler and the
//!   workers; a full queue blocks the scheduler
//! - **Worker pool**: a fixed number of tasks, each performing one upload at a
//!   time and marking the record delivered on success
//! - **Signal listener**: `POST /signal` wakes the scheduler, answering
//!   `409 Conflict` while a signal is already pending
//!
//! Record storage and delivery sit behind the [`RecordSource`] and
//! [`RemoteSink`] traits. Failed uploads are never retried directly; the
//! record stays pending and a later cycle picks it up.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use crm_uploader::{InMemorySource, RecordingSink, Uploader, UploaderConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(InMemorySource::new());
//!     let sink = Arc::new(RecordingSink::new());
//!
//!     let handle = Uploader::new(UploaderConfig::default(), source, sink).start()?;
//!     let _ = handle.notify();
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod signal;
pub mod sink;
pub mod source;
pub mod uploader;
pub mod wake;
pub mod worker;

// Re-export commonly used types
pub use backoff::Backoff;
pub use config::Config;
pub use error::{SignalError, SinkError, SourceError, UploaderError, UploaderResult};
pub use scheduler::{SchedulerState, SchedulerStatus};
pub use signal::SignalClient;
pub use sink::{HttpSink, RecordingSink, RemoteSink};
pub use source::{InMemorySource, PgRecordSource, RecordSource};
pub use uploader::{Uploader, UploaderConfig, UploaderHandle};
