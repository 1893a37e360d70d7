//! CRM Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging setup, and error handling for the CRM uploader
//! workspace.
//!
//! # Overview
//!
//! - **Types**: the customer payload and the pending-record envelope that flows
//!   from the staging store to the remote CRM
//! - **Logging**: centralized `tracing` subscriber configuration
//! - **Errors**: logging configuration failures
//!
//! # Example
//!
//! ```no_run
//! use crm_common::logging::{init_logging, LogConfig};
//! use crm_common::types::{Customer, PendingRecord};
//!
//! fn main() -> crm_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!
//!     let record = PendingRecord::from(Customer::new(1, "Ada", "Lovelace", "ada@example.com", "555-0100"));
//!     tracing::info!(key = %record.key, "ready for upload");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{Customer, PendingRecord, RecordKey};
