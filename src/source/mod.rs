// ============================================================================
// SOURCE ADAPTERS
// ============================================================================
// Normalizes counts pulled from unreliable collaborators:
// - Producers: text exposition, one counter per endpoint
// - Store: two independently maintained aggregates of the same count
// - Queue: passive depth lookup
//
// Every failure is logged and absorbed here. Callers only ever see
// canonical numbers, zero, or "unknown".
// ============================================================================

mod producer;
mod queue;
mod store;

pub use producer::HttpProducerSource;
pub use queue::RabbitMqQueue;
pub use store::GatewayStore;

pub(crate) use queue::encode_segment;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult, SourceResult};
use crate::exposition;
use crate::metrics::PipelineMetrics;

// ----------------------------------------------------------------------------
// Collaborator Traits
// ----------------------------------------------------------------------------

/// Fetches a producer's exposition document
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProducerSource: Send + Sync {
    async fn fetch(&self, url: &str) -> SourceResult<String>;
}

/// Durable store holding the processed aggregates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Verify the store answers at all
    async fn ping(&self) -> SourceResult<()>;

    /// Summed counts of the `primary` and `secondary` aggregate records,
    /// taken from one read of the store
    async fn aggregate_counts(&self, primary: &str, secondary: &str) -> SourceResult<(u64, u64)>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Broker queue depth lookup; must never create or modify the queue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueSource: Send + Sync {
    async fn depth(&self) -> SourceResult<u64>;
}

// ----------------------------------------------------------------------------
// Normalized Results
// ----------------------------------------------------------------------------

/// Generated counts from one poll of every producer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedCounts {
    pub total: u64,
    pub per_server: BTreeMap<String, u64>,
    pub reachable: usize,
    pub configured: usize,
}

impl GeneratedCounts {
    #[inline]
    pub fn is_partial(&self) -> bool {
        self.reachable < self.configured
    }
}

/// Canonical store count plus the disagreeing aggregates, if any
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCount {
    pub canonical: u64,
    pub discrepancy: Option<(u64, u64)>,
}

/// Resolve two aggregates of the same logical count.
///
/// Disagreeing non-zero aggregates resolve to the floor of their mean; when
/// only one is non-zero it is authoritative.
pub fn reconcile_store_counts(primary: u64, secondary: u64) -> StoreCount {
    if primary != secondary && primary > 0 && secondary > 0 {
        let mean = (u128::from(primary) + u128::from(secondary)) / 2;
        StoreCount {
            canonical: mean as u64,
            discrepancy: Some((primary, secondary)),
        }
    } else {
        StoreCount {
            canonical: if primary > 0 { primary } else { secondary },
            discrepancy: None,
        }
    }
}

/// Producer identity: the host of its metrics URL
pub fn server_identity(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| url.to_string())
}

// ----------------------------------------------------------------------------
// Source Adapter
// ----------------------------------------------------------------------------

/// Fans out to every collaborator and absorbs their failures.
pub struct SourceAdapter {
    producer: Arc<dyn ProducerSource>,
    producer_urls: Vec<String>,
    counter: String,
    store: Arc<dyn StoreBackend>,
    primary_category: String,
    secondary_category: String,
    queue: Arc<dyn QueueSource>,
    metrics: Option<PipelineMetrics>,
}

impl std::fmt::Debug for SourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAdapter")
            .field("producer_urls", &self.producer_urls)
            .field("counter", &self.counter)
            .field("store", &self.store.describe())
            .finish()
    }
}

impl SourceAdapter {
    pub fn new(
        config: &MonitorConfig,
        producer: Arc<dyn ProducerSource>,
        store: Arc<dyn StoreBackend>,
        queue: Arc<dyn QueueSource>,
    ) -> Self {
        Self {
            producer,
            producer_urls: config.producers.urls.clone(),
            counter: config.producers.counter.clone(),
            store,
            primary_category: config.store.primary_category.clone(),
            secondary_category: config.store.secondary_category.clone(),
            queue,
            metrics: None,
        }
    }

    /// Build the HTTP-backed adapters described by `config`
    pub fn from_config(config: &MonitorConfig) -> MonitorResult<Self> {
        let producer = Arc::new(HttpProducerSource::new(&config.producers)?);
        let store = Arc::new(GatewayStore::new(&config.store)?);
        let queue = Arc::new(RabbitMqQueue::new(&config.queue)?);
        Ok(Self::new(config, producer, store, queue))
    }

    /// Update producer gauges as a side channel of every poll
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn producer_count(&self) -> usize {
        self.producer_urls.len()
    }

    pub fn store_description(&self) -> String {
        self.store.describe()
    }

    /// Startup probe. An unreachable store is the only fatal condition.
    pub async fn verify_store(&self) -> MonitorResult<()> {
        self.store.ping().await.map_err(MonitorError::StoreUnavailable)?;
        info!(target: "logwatch::source", store = %self.store.describe(), "Connected to store");
        Ok(())
    }

    /// Poll every producer. Unreachable producers are logged and excluded.
    pub async fn fetch_generated(&self) -> GeneratedCounts {
        let mut counts = GeneratedCounts {
            configured: self.producer_urls.len(),
            ..GeneratedCounts::default()
        };

        for url in &self.producer_urls {
            let text = match self.producer.fetch(url).await {
                Ok(text) => text,
                Err(e) => {
                    error!(
                        target: "logwatch::source",
                        url = %url,
                        error = %e,
                        "Error getting generated logs count"
                    );
                    continue;
                }
            };

            let server = server_identity(url);
            let generated = exposition::find_counter(&text, &self.counter).unwrap_or(0);
            let server_total = {
                let entry = counts.per_server.entry(server.clone()).or_insert(0);
                *entry += generated;
                *entry
            };
            counts.total += generated;
            counts.reachable += 1;

            if let Some(metrics) = &self.metrics {
                metrics.record_producer(&server, server_total, &exposition::sample_map(&text));
            }

            info!(target: "logwatch::source", server = %server, generated, "Collected producer count");
        }

        if counts.is_partial() {
            let partial = MonitorError::PartialData {
                reachable: counts.reachable,
                configured: counts.configured,
            };
            warn!(target: "logwatch::source", error = %partial, "Proceeding with partial sum");
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_generated_total(counts.total);
        }

        debug!(
            target: "logwatch::source",
            total = counts.total,
            servers = counts.per_server.len(),
            "Total logs generated across all servers"
        );

        counts
    }

    /// Canonical processed count. Any store failure yields zero.
    pub async fn fetch_store_count(&self) -> StoreCount {
        let counts = self
            .store
            .aggregate_counts(&self.primary_category, &self.secondary_category)
            .await;

        let (primary, secondary) = match counts {
            Ok(counts) => counts,
            Err(e) => {
                error!(target: "logwatch::source", error = %e, "Error getting logs count from store");
                return StoreCount::default();
            }
        };

        let count = reconcile_store_counts(primary, secondary);
        if let Some((p, s)) = count.discrepancy {
            warn!(
                target: "logwatch::source",
                primary = p,
                secondary = s,
                canonical = count.canonical,
                "Internal inconsistency detected: {} count ({}) != {} count ({})",
                self.primary_category,
                p,
                self.secondary_category,
                s
            );
        }
        count
    }

    /// Current queue depth; `None` when the broker cannot be reached.
    pub async fn fetch_queue_depth(&self) -> Option<u64> {
        match self.queue.depth().await {
            Ok(depth) => Some(depth),
            Err(e) => {
                error!(target: "logwatch::source", error = %e, "Error getting queue depth");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::monitor::MonitorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn config(urls: &[&str]) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.producers.urls = urls.iter().map(|s| s.to_string()).collect();
        config
    }

    fn refused(endpoint: &str) -> SourceError {
        SourceError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            message: "connection refused".into(),
        }
    }

    fn adapter(
        urls: &[&str],
        producer: MockProducerSource,
        store: MockStoreBackend,
        queue: MockQueueSource,
    ) -> SourceAdapter {
        SourceAdapter::new(&config(urls), Arc::new(producer), Arc::new(store), Arc::new(queue))
    }

    fn store_with(counts: SourceResult<(u64, u64)>) -> MockStoreBackend {
        let mut store = MockStoreBackend::new();
        let mut counts = Some(counts);
        store
            .expect_aggregate_counts()
            .withf(|primary, secondary| primary == "ip" && secondary == "endpoint")
            .times(1)
            .returning(move |_, _| counts.take().unwrap_or(Ok((0, 0))));
        store.expect_describe().returning(|| "mock".to_string());
        store
    }

    #[rstest]
    #[case(100, 100, 100, false)]
    #[case(100, 0, 100, false)]
    #[case(0, 100, 100, false)]
    #[case(80, 120, 100, true)]
    #[case(80, 121, 100, true)]
    #[case(0, 0, 0, false)]
    fn test_reconcile_store_counts(
        #[case] primary: u64,
        #[case] secondary: u64,
        #[case] canonical: u64,
        #[case] flagged: bool,
    ) {
        let count = reconcile_store_counts(primary, secondary);
        assert_eq!(count.canonical, canonical);
        assert_eq!(count.discrepancy.is_some(), flagged);
    }

    #[rstest]
    #[case("http://server-1:8000/metrics", "server-1")]
    #[case("http://10.0.0.7:8000/metrics", "10.0.0.7")]
    #[case("not a url", "not a url")]
    fn test_server_identity(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(server_identity(url), expected);
    }

    #[tokio::test]
    async fn test_partial_producer_failure() {
        let mut producer = MockProducerSource::new();
        producer.expect_fetch().returning(|url| {
            if url.contains("server-1") {
                Ok("# TYPE logs_generated_total counter\nlogs_generated_total 4200.0\n".to_string())
            } else {
                Err(refused(url))
            }
        });

        let adapter = adapter(
            &[
                "http://server-1:8000/metrics",
                "http://server-2:8000/metrics",
                "http://server-3:8000/metrics",
            ],
            producer,
            MockStoreBackend::new(),
            MockQueueSource::new(),
        );

        let counts = adapter.fetch_generated().await;
        assert_eq!(counts.total, 4200);
        assert_eq!(counts.reachable, 1);
        assert_eq!(counts.configured, 3);
        assert!(counts.is_partial());
        assert_eq!(counts.per_server, BTreeMap::from([("server-1".to_string(), 4200)]));
    }

    #[tokio::test]
    async fn test_missing_counter_counts_as_zero() {
        let mut producer = MockProducerSource::new();
        producer
            .expect_fetch()
            .returning(|_| Ok("unrelated_series 12\n".to_string()));

        let adapter = adapter(
            &["http://server-1:8000/metrics"],
            producer,
            MockStoreBackend::new(),
            MockQueueSource::new(),
        );

        let counts = adapter.fetch_generated().await;
        assert_eq!(counts.total, 0);
        assert_eq!(counts.reachable, 1);
    }

    #[tokio::test]
    async fn test_producer_side_channel_updates_gauges() {
        let mut producer = MockProducerSource::new();
        producer
            .expect_fetch()
            .returning(|_| Ok("logs_generated_total 10\n".to_string()));

        let metrics = PipelineMetrics::new(MonitorKind::Consistency).unwrap();
        let adapter = adapter(
            &["http://server-1:8000/metrics", "http://server-2:8000/metrics"],
            producer,
            MockStoreBackend::new(),
            MockQueueSource::new(),
        )
        .with_metrics(metrics.clone());

        adapter.fetch_generated().await;
        let text = metrics.encode().unwrap();
        assert!(text.contains("logs_generated_total{server=\"server-2\"} 10"));
        assert!(text.contains("logs_generated_total_combined 20"));
    }

    #[tokio::test]
    async fn test_store_discrepancy_is_averaged() {
        let adapter = adapter(
            &["http://server-1:8000/metrics"],
            MockProducerSource::new(),
            store_with(Ok((80, 120))),
            MockQueueSource::new(),
        );

        let count = adapter.fetch_store_count().await;
        assert_eq!(count.canonical, 100);
        assert_eq!(count.discrepancy, Some((80, 120)));
    }

    #[tokio::test]
    async fn test_store_failure_yields_zero() {
        let adapter = adapter(
            &["http://server-1:8000/metrics"],
            MockProducerSource::new(),
            store_with(Err(refused("gateway"))),
            MockQueueSource::new(),
        );

        assert_eq!(adapter.fetch_store_count().await, StoreCount::default());
    }

    #[tokio::test]
    async fn test_queue_failure_is_unknown_not_zero() {
        let mut queue = MockQueueSource::new();
        queue.expect_depth().times(1).returning(|| Err(refused("rabbitmq")));
        let failing = adapter(&["http://a:1/metrics"], MockProducerSource::new(), MockStoreBackend::new(), queue);
        assert_eq!(failing.fetch_queue_depth().await, None);

        let mut queue = MockQueueSource::new();
        queue.expect_depth().times(1).returning(|| Ok(0));
        let empty = adapter(&["http://a:1/metrics"], MockProducerSource::new(), MockStoreBackend::new(), queue);
        assert_eq!(empty.fetch_queue_depth().await, Some(0));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal_at_startup() {
        let mut store = MockStoreBackend::new();
        store.expect_ping().returning(|| Err(refused("gateway")));
        store.expect_describe().returning(|| "mock".to_string());

        let adapter = adapter(&["http://a:1/metrics"], MockProducerSource::new(), store, MockQueueSource::new());
        let err = adapter.verify_store().await.unwrap_err();
        assert!(matches!(err, MonitorError::StoreUnavailable(_)));
        assert!(!err.is_recoverable());
    }
}
