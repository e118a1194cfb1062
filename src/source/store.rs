//! Store adapter backed by the log gateway's aggregate listing.
//!
//! The analyzer writes one record per aggregate key (`type` = `ip`,
//! `endpoint`, ...) with a running `count`. Summing `count` over one type
//! yields that aggregate's view of the processed total. Both aggregates of a
//! tick are summed from the same listing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::trace;

use super::StoreBackend;
use crate::config::StoreConfig;
use crate::error::{SourceError, SourceResult};

/// One aggregate record as listed by the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub count: Option<i64>,
}

/// Sum the counts of every record of `category`, ignoring negatives.
pub fn sum_category(records: &[AggregateRecord], category: &str) -> u64 {
    records
        .iter()
        .filter(|r| r.kind == category)
        .filter_map(|r| r.count)
        .map(|c| c.max(0) as u64)
        .sum()
}

#[derive(Debug, Clone)]
pub struct GatewayStore {
    client: Client,
    listing_url: String,
    database: String,
    collection: String,
    timeout_ms: u64,
}

impl GatewayStore {
    pub fn new(config: &StoreConfig) -> SourceResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SourceError::ConnectionFailed {
                endpoint: config.url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            listing_url: format!("{}/api/logs", config.url.trim_end_matches('/')),
            database: config.database.clone(),
            collection: config.collection.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    async fn get(&self) -> SourceResult<reqwest::Response> {
        let response = self
            .client
            .get(&self.listing_url)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&self.listing_url, self.timeout_ms, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                endpoint: self.listing_url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn records(&self) -> SourceResult<Vec<AggregateRecord>> {
        self.get()
            .await?
            .json::<Vec<AggregateRecord>>()
            .await
            .map_err(|e| SourceError::InvalidResponse {
                endpoint: self.listing_url.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl StoreBackend for GatewayStore {
    async fn ping(&self) -> SourceResult<()> {
        self.get().await.map(|_| ())
    }

    async fn aggregate_counts(&self, primary: &str, secondary: &str) -> SourceResult<(u64, u64)> {
        let records = self.records().await?;
        let counts = (sum_category(&records, primary), sum_category(&records, secondary));
        trace!(
            target: "logwatch::source",
            records = records.len(),
            primary = counts.0,
            secondary = counts.1,
            "Summed store aggregates"
        );
        Ok(counts)
    }

    fn describe(&self) -> String {
        format!("{} ({}.{})", self.listing_url, self.database, self.collection)
    }
}
