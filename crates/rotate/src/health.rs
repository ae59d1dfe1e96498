//! HTTP liveness probes against the API and enclave health endpoints.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("unhealthy status {0}")]
    Status(u16),
    #[error("timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// GET `url`; any 2xx is healthy. Returns the status code.
    async fn check(&self, url: &str) -> Result<u16, HealthError>;
}

/// `reqwest`-backed probe with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestHealthProbe {
    client: reqwest::Client,
}

impl ReqwestHealthProbe {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for ReqwestHealthProbe {
    async fn check(&self, url: &str) -> Result<u16, HealthError> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                HealthError::Timeout
            } else {
                HealthError::Request(e.to_string())
            }
        })?;
        let status = resp.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(HealthError::Status(status.as_u16()))
        }
    }
}
