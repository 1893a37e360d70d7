//! HTTP sink posting customers to the CRM API

use std::time::Duration;

use async_trait::async_trait;
use crm_common::Customer;
use reqwest::{Client, StatusCode};
use url::Url;

use super::RemoteSink;
use crate::config::CrmConfig;
use crate::error::{SinkError, UploaderError, UploaderResult};

/// The only status the CRM returns for an accepted customer.
pub const ACCEPTED_STATUS: StatusCode = StatusCode::CREATED;

/// Posts each customer as JSON to `{server_addr}{api_path}`
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
}

impl HttpSink {
    pub fn new(config: &CrmConfig) -> UploaderResult<Self> {
        let endpoint = endpoint_url(&config.server_addr, &config.api_path)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.client_timeout_secs))
            .build()?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn endpoint_url(server_addr: &str, api_path: &str) -> UploaderResult<Url> {
    let joined = format!(
        "{}/{}",
        server_addr.trim_end_matches('/'),
        api_path.trim_start_matches('/')
    );
    let url = Url::parse(&joined)
        .map_err(|e| UploaderError::Config(format!("invalid CRM endpoint {joined}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UploaderError::Config(format!(
            "CRM endpoint {joined} must use http or https, not {other}"
        ))),
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn upload(&self, customer: &Customer) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(customer)
            .send()
            .await?;

        let status = response.status();
        if status != ACCEPTED_STATUS {
            return Err(SinkError::UnexpectedStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        Ok(())
    }
}
