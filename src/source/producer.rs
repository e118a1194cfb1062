use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::ProducerSource;
use crate::config::ProducersConfig;
use crate::error::{SourceError, SourceResult};

/// Scrapes producer exposition endpoints over HTTP
#[derive(Debug, Clone)]
pub struct HttpProducerSource {
    client: Client,
    timeout_ms: u64,
}

impl HttpProducerSource {
    pub fn new(config: &ProducersConfig) -> SourceResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| SourceError::ConnectionFailed {
                endpoint: "producers".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl ProducerSource for HttpProducerSource {
    async fn fetch(&self, url: &str) -> SourceResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(url, self.timeout_ms, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                endpoint: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| SourceError::from_reqwest(url, self.timeout_ms, e))
    }
}
