//! Client for the signal listener, used by writers that stage new records

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::SignalError;

/// Default timeout for a signal request in seconds.
pub const DEFAULT_SIGNAL_TIMEOUT_SECS: u64 = 5;

/// Sends wake-up signals to a running uploader
pub struct SignalClient {
    client: Client,
    url: String,
}

impl SignalClient {
    /// `addr` is either `host:port` or a full base URL.
    pub fn new(addr: &str) -> Result<Self, SignalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_SIGNAL_TIMEOUT_SECS))
            .build()?;

        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            url: format!("{}/signal", base),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Signal that work may be ready.
    ///
    /// [`SignalError::Busy`] means a signal is already pending, so the
    /// uploader will look for work anyway.
    pub async fn signal(&self) -> Result<(), SignalError> {
        let response = self.client.post(&self.url).send().await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(SignalError::Busy),
            StatusCode::SERVICE_UNAVAILABLE => Err(SignalError::Closed),
            status => Err(SignalError::UnexpectedStatus(status.as_u16())),
        }
    }
}
