//! Uploader error types
//!
//! None of these are fatal to the scheduler loop. Source and sink errors are
//! logged per record or per cycle and the record stays pending for the next
//! dispatch.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crm_common::RecordKey;
use serde_json::json;
use thiserror::Error;

/// Failures selecting pending records or marking them delivered
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(RecordKey),

    #[error("Record source unavailable: {0}")]
    Unavailable(String),
}

/// Failures delivering a record to the remote CRM
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Error while posting to CRM: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Post to CRM failed with ({status}) {reason}")]
    UnexpectedStatus { status: u16, reason: String },

    #[error("CRM rejected record: {0}")]
    Rejected(String),
}

/// Failures delivering a wake-up signal
#[derive(Error, Debug)]
pub enum SignalError {
    /// A signal is already pending; this one was dropped
    #[error("signal listener busy")]
    Busy,

    /// The uploader has shut down
    #[error("signal listener closed")]
    Closed,

    #[error("Signal transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Signal rejected with status {0}")]
    UnexpectedStatus(u16),
}

impl IntoResponse for SignalError {
    fn into_response(self) -> Response {
        let status = match self {
            SignalError::Busy => StatusCode::CONFLICT,
            SignalError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            SignalError::Transport(ref e) => {
                tracing::error!("Signal transport error: {:?}", e);
                StatusCode::BAD_GATEWAY
            },
            SignalError::UnexpectedStatus(_) => StatusCode::BAD_GATEWAY,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Why a single upload attempt did not complete
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Uploaded but could not mark delivered: {0}")]
    MarkDelivered(#[from] SourceError),
}

/// Failures handing a record to the dispatch queue
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("dispatch cancelled by shutdown")]
    Cancelled,

    #[error("dispatch queue closed")]
    Closed,
}

/// Startup and wiring failures surfaced to the binary
#[derive(Error, Debug)]
pub enum UploaderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for uploader setup operations
pub type UploaderResult<T> = std::result::Result<T, UploaderError>;
