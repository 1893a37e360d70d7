//! HTTP transport for wake-up signals
//!
//! External writers call `POST /signal` after staging new records. The
//! listener forwards each call to the scheduler's signal slot and answers
//! `409 Conflict` while a previous signal is still pending.

pub mod client;
pub mod listener;

pub use client::SignalClient;
pub use listener::{router, serve, ListenerState};
