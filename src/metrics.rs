// ============================================================================
// METRICS SINK
// ============================================================================
// Prometheus series for the monitors and the synthetic producer, plus the
// pull-based exporter serving them:
// - One registry per process (no global default registry)
// - Series registered per monitor kind
// - `GET /metrics` text exposition and `GET /health` via axum
// ============================================================================

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::classifier::{ConsistencyVerdict, LatencyVerdict};
use crate::error::{SinkError, SinkResult};
use crate::monitor::MonitorKind;
use crate::types::Observation;
use crate::{GENERATED_COUNTER_NAME, LATENCY_BUCKETS_MS, LOGWATCH_VERSION};

/// Component label for the downstream analyzer
pub const ANALYZER_COMPONENT: &str = "analyzer";

fn gauge(registry: &Registry, name: &str, help: &str) -> SinkResult<Gauge> {
    let g = Gauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, label: &str) -> SinkResult<GaugeVec> {
    let g = GaugeVec::new(Opts::new(name, help), &[label])?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn counter(registry: &Registry, name: &str, help: &str) -> SinkResult<IntCounter> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

// ----------------------------------------------------------------------------
// Consistency Series
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ConsistencyMetrics {
    generated_by_server: GaugeVec,
    generated_combined: Gauge,
    processed: Gauge,
    queue_depth: Gauge,
    ratio: Gauge,
    estimated_processing_time: Gauge,
    checks: IntCounter,
    errors: IntCounter,
}

impl ConsistencyMetrics {
    fn register(registry: &Registry) -> SinkResult<Self> {
        Ok(Self {
            generated_by_server: gauge_vec(
                registry,
                GENERATED_COUNTER_NAME,
                "Total number of generated logs",
                "server",
            )?,
            generated_combined: gauge(
                registry,
                "logs_generated_total_combined",
                "Total combined logs generated from all servers",
            )?,
            processed: gauge(registry, "logs_processed_total", "Total number of processed logs")?,
            queue_depth: gauge(registry, "rabbitmq_queue_depth", "Current queue depth")?,
            ratio: gauge(
                registry,
                "consistency_ratio",
                "Ratio between processed and generated logs (percentage)",
            )?,
            estimated_processing_time: gauge(
                registry,
                "estimated_processing_time_seconds",
                "Estimated time to process current queue in seconds",
            )?,
            checks: counter(
                registry,
                "consistency_checks_total",
                "Total number of consistency checks performed",
            )?,
            errors: counter(
                registry,
                "consistency_errors_total",
                "Total number of consistency errors detected",
            )?,
        })
    }
}

// ----------------------------------------------------------------------------
// Performance Series
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PerformanceMetrics {
    processing_time: GaugeVec,
    processing_rate: GaugeVec,
    processed_by_component: GaugeVec,
    queue_size: Gauge,
    queue_rate: Gauge,
    latency: HistogramVec,
    checks: IntCounter,
    warnings: IntCounter,
    errors: IntCounter,
}

impl PerformanceMetrics {
    fn register(registry: &Registry) -> SinkResult<Self> {
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "log_processing_latency_ms",
                "Histogram of log processing latency in milliseconds",
            )
            .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["component"],
        )?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            processing_time: gauge_vec(
                registry,
                "log_processing_time_ms",
                "Average log processing time in milliseconds",
                "component",
            )?,
            processing_rate: gauge_vec(
                registry,
                "log_processing_rate",
                "Number of logs processed per second",
                "component",
            )?,
            processed_by_component: gauge_vec(
                registry,
                "logs_processed_total_by_component",
                "Total number of logs processed",
                "component",
            )?,
            queue_size: gauge(registry, "rabbitmq_queue_size", "Current size of the queue")?,
            queue_rate: gauge(
                registry,
                "rabbitmq_queue_rate",
                "Rate of change of the queue size (logs/second)",
            )?,
            latency,
            checks: counter(
                registry,
                "performance_checks_total",
                "Total number of performance checks performed",
            )?,
            warnings: counter(
                registry,
                "performance_warnings_total",
                "Total number of performance warnings detected",
            )?,
            errors: counter(
                registry,
                "performance_errors_total",
                "Total number of performance errors detected",
            )?,
        })
    }

    fn record_latency(&self, component: &str, latency_ms: f64) {
        self.processing_time.with_label_values(&[component]).set(latency_ms);
        self.latency.with_label_values(&[component]).observe(latency_ms);
    }
}

/// Series exposed by one monitor, selected by its kind.
#[derive(Debug, Clone)]
enum Series {
    Consistency(ConsistencyMetrics),
    Performance(PerformanceMetrics),
}

// ----------------------------------------------------------------------------
// Pipeline Metrics - Monitor Facade
// ----------------------------------------------------------------------------

/// Gauges and counters of one monitor process.
///
/// Recording methods that do not apply to the monitor's kind are no-ops.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    series: Series,
}

impl PipelineMetrics {
    /// Register the series of `kind` in a fresh registry
    pub fn new(kind: MonitorKind) -> SinkResult<Self> {
        let registry = Registry::new();
        let series = match kind {
            MonitorKind::Consistency => Series::Consistency(ConsistencyMetrics::register(&registry)?),
            MonitorKind::Performance => Series::Performance(PerformanceMetrics::register(&registry)?),
        };
        Ok(Self { registry, series })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Side channel of a producer poll
    pub fn record_producer(&self, server: &str, generated: u64, series: &BTreeMap<String, f64>) {
        match &self.series {
            Series::Consistency(m) => {
                m.generated_by_server.with_label_values(&[server]).set(generated as f64);
            }
            Series::Performance(m) => {
                let component = format!("server_{}", server);
                for (key, value) in series {
                    if key == GENERATED_COUNTER_NAME {
                        m.processed_by_component.with_label_values(&[component.as_str()]).set(*value);
                    } else if key.contains("processing_time") && !key.contains("_count") && !key.contains("_sum") {
                        m.record_latency(&component, *value);
                    }
                }
            }
        }
    }

    /// Combined generated count across reachable producers
    pub fn record_generated_total(&self, total: u64) {
        if let Series::Consistency(m) = &self.series {
            m.generated_combined.set(total as f64);
        }
    }

    /// Counts and derived rates of the latest observation
    pub fn record_observation(&self, observation: &Observation) {
        match &self.series {
            Series::Consistency(m) => {
                m.checks.inc();
                m.processed.set(observation.processed as f64);
                if let Some(depth) = observation.queue_depth {
                    m.queue_depth.set(depth as f64);
                }
                if let Some(ratio) = observation.ratio {
                    m.ratio.set(ratio);
                }
            }
            Series::Performance(m) => {
                m.checks.inc();
                if let Some(depth) = observation.queue_depth {
                    m.queue_size.set(depth as f64);
                }
                if let Some(rate) = observation.processing_rate {
                    m.processing_rate.with_label_values(&[ANALYZER_COMPONENT]).set(rate);
                }
                if let Some(latency) = observation.avg_latency_ms {
                    m.record_latency(ANALYZER_COMPONENT, latency);
                }
                if let Some(rate) = observation.queue_growth_rate {
                    m.queue_rate.set(rate);
                }
            }
        }
    }

    pub fn record_consistency_verdict(&self, verdict: ConsistencyVerdict) {
        if let Series::Consistency(m) = &self.series {
            if verdict.counts_as_error() {
                m.errors.inc();
            }
        }
    }

    /// Warning and critical breaches are counted independently.
    pub fn record_latency_verdict(&self, verdict: LatencyVerdict) {
        if let Series::Performance(m) = &self.series {
            if verdict.breaches_warning() {
                m.warnings.inc();
            }
            if verdict.breaches_critical() {
                m.errors.inc();
            }
        }
    }

    pub fn record_drain_estimate(&self, seconds: f64) {
        if let Series::Consistency(m) = &self.series {
            m.estimated_processing_time.set(seconds);
        }
    }

    /// (checks, errors) for consistency; (checks, warnings + errors) otherwise
    pub fn check_counters(&self) -> (u64, u64) {
        match &self.series {
            Series::Consistency(m) => (m.checks.get(), m.errors.get()),
            Series::Performance(m) => (m.checks.get(), m.warnings.get() + m.errors.get()),
        }
    }

    pub fn encode(&self) -> SinkResult<String> {
        encode_registry(&self.registry)
    }
}

// ----------------------------------------------------------------------------
// Producer Series
// ----------------------------------------------------------------------------

/// Counters exported by the synthetic producer
#[derive(Debug, Clone)]
pub struct ProducerMetrics {
    registry: Registry,
    pub logs_generated: IntCounter,
    pub logs_sent: IntCounter,
    pub connection_errors: IntCounter,
    pub active_workers: IntGauge,
}

impl ProducerMetrics {
    pub fn new() -> SinkResult<Self> {
        let registry = Registry::new();

        let active_workers = IntGauge::new("active_workers", "Number of active workers")?;
        registry.register(Box::new(active_workers.clone()))?;

        Ok(Self {
            logs_generated: counter(&registry, GENERATED_COUNTER_NAME, "Total number of logs generated")?,
            logs_sent: counter(&registry, "logs_sent_total", "Total number of logs sent to the queue")?,
            connection_errors: counter(
                &registry,
                "connection_errors_total",
                "Total number of connection errors",
            )?,
            active_workers,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

// ----------------------------------------------------------------------------
// Exposition & Exporter
// ----------------------------------------------------------------------------

/// Render a registry in the Prometheus text format
pub fn encode_registry(registry: &Registry) -> SinkResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match encode_registry(&registry) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(target: "logwatch::metrics", error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "version": LOGWATCH_VERSION }))
}

/// Router serving `/metrics` and `/health` for a registry
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry)
}

/// Pull-based exporter for one registry
#[derive(Debug, Clone)]
pub struct MetricsExporter {
    registry: Registry,
}

impl MetricsExporter {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Bind `address` and serve until `cancel` fires.
    ///
    /// Binding happens before returning so a taken port fails startup.
    pub async fn spawn(self, address: &str, cancel: CancellationToken) -> SinkResult<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(address).await.map_err(|source| SinkError::Bind {
            address: address.to_string(),
            source,
        })?;
        let local = listener.local_addr().map_err(|source| SinkError::Bind {
            address: address.to_string(),
            source,
        })?;

        info!(target: "logwatch::metrics", address = %local, "Started Prometheus metrics HTTP server");

        let app = router(self.registry);
        let handle = tokio::spawn(async move {
            let shutdown = cancel.clone();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!(target: "logwatch::metrics", error = %e, "Metrics server failed");
            }
            debug!(target: "logwatch::metrics", "Metrics server stopped");
        });

        Ok((local, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn observation(queue: Option<u64>) -> Observation {
        let counts = BTreeMap::from([("server-1".to_string(), 10_000)]);
        Observation::new(Utc::now(), counts, queue, 8_000)
    }

    #[test]
    fn test_consistency_series_exposed() {
        let metrics = PipelineMetrics::new(MonitorKind::Consistency).unwrap();
        metrics.record_producer("server-1", 10_000, &BTreeMap::new());
        metrics.record_generated_total(10_000);
        metrics.record_observation(&observation(Some(2_000)));

        let text = metrics.encode().unwrap();
        assert!(text.contains("logs_generated_total{server=\"server-1\"} 10000"));
        assert!(text.contains("logs_generated_total_combined 10000"));
        assert!(text.contains("consistency_ratio 100"));
        assert!(text.contains("rabbitmq_queue_depth 2000"));
        assert!(!text.contains("performance_checks_total"));
    }

    #[test]
    fn test_consistency_error_counter_follows_verdict() {
        let metrics = PipelineMetrics::new(MonitorKind::Consistency).unwrap();
        metrics.record_consistency_verdict(ConsistencyVerdict::LowButImproving);
        metrics.record_consistency_verdict(ConsistencyVerdict::Ok);
        assert_eq!(metrics.check_counters().1, 0);

        metrics.record_consistency_verdict(ConsistencyVerdict::LowAlert);
        metrics.record_consistency_verdict(ConsistencyVerdict::HighAlert);
        assert_eq!(metrics.check_counters().1, 2);
    }

    #[test]
    fn test_critical_latency_counts_warning_and_error() {
        let metrics = PipelineMetrics::new(MonitorKind::Performance).unwrap();
        metrics.record_latency_verdict(LatencyVerdict::Critical);

        let text = metrics.encode().unwrap();
        assert!(text.contains("performance_warnings_total 1"));
        assert!(text.contains("performance_errors_total 1"));
    }

    #[test]
    fn test_performance_producer_series() {
        let metrics = PipelineMetrics::new(MonitorKind::Performance).unwrap();
        let series = BTreeMap::from([
            ("logs_generated_total".to_string(), 500.0),
            ("request_processing_time".to_string(), 120.0),
            ("request_processing_time_sum".to_string(), 9_999.0),
        ]);
        metrics.record_producer("server-1", 500, &series);

        let text = metrics.encode().unwrap();
        assert!(text.contains("logs_processed_total_by_component{component=\"server_server-1\"} 500"));
        assert!(text.contains("log_processing_time_ms{component=\"server_server-1\"} 120"));
        assert!(text.contains("log_processing_latency_ms_bucket{component=\"server_server-1\",le=\"200\"} 1"));
        assert!(!text.contains("9999"));
    }

    #[test]
    fn test_producer_metrics_register() {
        let metrics = ProducerMetrics::new().unwrap();
        metrics.logs_generated.inc_by(50);
        metrics.active_workers.set(4);

        let text = encode_registry(metrics.registry()).unwrap();
        assert!(text.contains("logs_generated_total 50"));
        assert!(text.contains("active_workers 4"));
    }

    #[tokio::test]
    async fn test_exporter_serves_and_stops() {
        let metrics = ProducerMetrics::new().unwrap();
        metrics.logs_sent.inc();
        let cancel = CancellationToken::new();

        let (addr, handle) = MetricsExporter::new(metrics.registry().clone())
            .spawn("127.0.0.1:0", cancel.clone())
            .await
            .unwrap();

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("logs_sent_total 1"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
