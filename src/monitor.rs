// ============================================================================
// MONITOR LOOP
// ============================================================================
// The consistency and performance monitors are one component parameterized
// by a profile. Each cycle runs tick -> classify -> publish to completion
// before sleeping, so history and counters are never touched concurrently.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::classifier::{ConsistencyVerdict, LatencyVerdict, ThresholdClassifier};
use crate::config::MonitorConfig;
use crate::engine::{ReconciliationEngine, TickReport};
use crate::error::MonitorResult;
use crate::logging::PerfTimer;
use crate::metrics::PipelineMetrics;
use crate::snapshot::{Snapshot, SnapshotPublisher};
use crate::source::SourceAdapter;
use crate::*;

// ----------------------------------------------------------------------------
// Monitor Kind & Profile
// ----------------------------------------------------------------------------

/// Which derived metrics and thresholds a monitor evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Consistency,
    Performance,
}

impl Display for MonitorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MonitorKind::Consistency => write!(f, "consistency"),
            MonitorKind::Performance => write!(f, "performance"),
        }
    }
}

/// Static parameters distinguishing the two monitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorProfile {
    pub kind: MonitorKind,
    pub history_capacity: usize,
    pub snapshot_tail: usize,
    pub snapshot_file: &'static str,
    pub default_metrics_port: u16,
}

impl MonitorProfile {
    pub fn consistency() -> Self {
        Self {
            kind: MonitorKind::Consistency,
            history_capacity: CONSISTENCY_HISTORY_CAPACITY,
            snapshot_tail: CONSISTENCY_SNAPSHOT_TAIL,
            snapshot_file: "consistency_metrics.json",
            default_metrics_port: DEFAULT_CONSISTENCY_METRICS_PORT,
        }
    }

    pub fn performance() -> Self {
        Self {
            kind: MonitorKind::Performance,
            history_capacity: PERFORMANCE_HISTORY_CAPACITY,
            snapshot_tail: PERFORMANCE_SNAPSHOT_TAIL,
            snapshot_file: "performance_metrics.json",
            default_metrics_port: DEFAULT_PERFORMANCE_METRICS_PORT,
        }
    }

    pub fn for_kind(kind: MonitorKind) -> Self {
        match kind {
            MonitorKind::Consistency => Self::consistency(),
            MonitorKind::Performance => Self::performance(),
        }
    }
}

// ----------------------------------------------------------------------------
// Monitor
// ----------------------------------------------------------------------------

/// One reconciliation monitor: engine, classifier, metrics and snapshot.
#[derive(Debug)]
pub struct Monitor {
    profile: MonitorProfile,
    engine: ReconciliationEngine,
    classifier: ThresholdClassifier,
    metrics: PipelineMetrics,
    publisher: SnapshotPublisher,
    poll_interval: Duration,
    initial_pause: Duration,
    delay_allowance_secs: u64,
}

impl Monitor {
    /// Assemble a monitor around already-built sources
    pub fn new(profile: MonitorProfile, config: &MonitorConfig, sources: SourceAdapter) -> MonitorResult<Self> {
        let metrics = PipelineMetrics::new(profile.kind)?;
        let engine = ReconciliationEngine::new(sources.with_metrics(metrics.clone()), profile.history_capacity);
        let publisher = SnapshotPublisher::new(&config.monitor.snapshot_dir, profile.snapshot_file);

        Ok(Self {
            classifier: ThresholdClassifier::new(config.thresholds),
            engine,
            metrics,
            publisher,
            poll_interval: config.monitor.poll_interval(),
            initial_pause: config.monitor.initial_pause(),
            delay_allowance_secs: config.monitor.processing_delay_allowance_secs,
            profile,
        })
    }

    /// Monitor backed by the HTTP adapters described by `config`
    pub fn from_config(kind: MonitorKind, config: &MonitorConfig) -> MonitorResult<Self> {
        Self::new(MonitorProfile::for_kind(kind), config, SourceAdapter::from_config(config)?)
    }

    pub fn profile(&self) -> &MonitorProfile {
        &self.profile
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn publisher(&self) -> &SnapshotPublisher {
        &self.publisher
    }

    /// One tick, evaluation and publish.
    ///
    /// A failed snapshot write is returned after metrics are updated.
    pub async fn cycle(&mut self) -> MonitorResult<Snapshot> {
        self.cycle_at(Utc::now()).await
    }

    /// One cycle whose observation is stamped with `timestamp`.
    pub async fn cycle_at(&mut self, timestamp: DateTime<Utc>) -> MonitorResult<Snapshot> {
        let report = self.engine.tick_at(timestamp).await;
        let snapshot = self.evaluate(&report);
        self.publisher.publish(&snapshot).await?;
        Ok(snapshot)
    }

    /// Classify a tick, update metrics and build its snapshot.
    pub fn evaluate(&self, report: &TickReport) -> Snapshot {
        self.metrics.record_observation(&report.observation);

        let drain = self.engine.estimate_drain_seconds();
        if let Some(seconds) = drain {
            self.metrics.record_drain_estimate(seconds);
        }

        let history = self.engine.history().tail(self.profile.snapshot_tail);
        let snapshot = Snapshot::new(self.profile.kind, report, history).with_drain_estimate(drain);

        match self.profile.kind {
            MonitorKind::Consistency => {
                self.evaluate_consistency(report);
                snapshot
            }
            MonitorKind::Performance => {
                self.evaluate_performance(report);
                let window = self.engine.history().recent(HEALTH_WINDOW);
                let health = self.classifier.assess_health(&window, report.observation.timestamp);
                info!(
                    target: "logwatch::monitor",
                    status = %health.status,
                    processing_trend = %health.processing_trend,
                    queue_trend = %health.queue_trend,
                    "Health assessment"
                );
                snapshot.with_health(health)
            }
        }
    }

    fn evaluate_consistency(&self, report: &TickReport) {
        let Some(ratio) = report.observation.ratio else {
            return;
        };

        let verdict = self.classifier.classify(ratio, report.trend);
        self.metrics.record_consistency_verdict(verdict);

        let percentage = format!("{:.2}%", ratio);
        match verdict {
            ConsistencyVerdict::Ok => {
                info!(target: "logwatch::monitor", ratio = %percentage, "Consistency within acceptable range")
            }
            ConsistencyVerdict::LowButImproving => warn!(
                target: "logwatch::monitor",
                ratio = %percentage,
                trend = %report.trend,
                "Consistency below threshold, but improving"
            ),
            ConsistencyVerdict::LowAlert => crate::log_alert!(
                verdict,
                "Low consistency, potential data loss",
                ratio = %percentage,
                trend = %report.trend
            ),
            ConsistencyVerdict::HighAlert => crate::log_alert!(
                verdict,
                "High consistency, potential duplicate processing",
                ratio = %percentage
            ),
        }
    }

    fn evaluate_performance(&self, report: &TickReport) {
        let observation = &report.observation;

        if let Some(rate) = observation.processing_rate {
            info!(target: "logwatch::monitor", rate = %format!("{:.2}", rate), "Processing rate (logs/sec)");
        }

        if let Some(latency) = observation.avg_latency_ms {
            let verdict = self.classifier.classify_latency(latency);
            self.metrics.record_latency_verdict(verdict);

            let latency = format!("{:.2}", latency);
            match verdict {
                LatencyVerdict::Ok => {
                    info!(target: "logwatch::monitor", latency_ms = %latency, "Average processing time per log")
                }
                LatencyVerdict::Warning => crate::log_alert!(
                    verdict,
                    "Processing time exceeds warning threshold",
                    latency_ms = %latency,
                    threshold_ms = self.classifier.thresholds().latency_warning_ms
                ),
                LatencyVerdict::Critical => crate::log_critical!(
                    verdict,
                    "Processing time exceeds critical threshold",
                    latency_ms = %latency,
                    threshold_ms = self.classifier.thresholds().latency_critical_ms
                ),
            }
        }

        if let Some(growth) = observation.queue_growth_rate {
            if growth > 0.0 {
                warn!(target: "logwatch::monitor", rate = %format!("{:.2}", growth), "Queue growing (logs/sec)");
            } else {
                info!(target: "logwatch::monitor", rate = %format!("{:.2}", growth.abs()), "Queue shrinking (logs/sec)");
            }
        }
    }

    /// Run until `cancel` fires.
    ///
    /// Only an unreachable store at startup is returned as an error; every
    /// cycle failure, panics included, is logged and the loop continues.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorResult<()> {
        self.engine.sources().verify_store().await?;

        info!(
            target: "logwatch::monitor",
            kind = %self.profile.kind,
            producers = self.engine.sources().producer_count(),
            store = %self.engine.sources().store_description(),
            "Starting monitor"
        );
        info!(
            target: "logwatch::monitor",
            low = self.classifier.thresholds().ratio_low,
            high = self.classifier.thresholds().ratio_high,
            warning_ms = self.classifier.thresholds().latency_warning_ms,
            critical_ms = self.classifier.thresholds().latency_critical_ms,
            delay_allowance_secs = self.delay_allowance_secs,
            "Thresholds"
        );

        if !self.initial_pause.is_zero() {
            info!(
                target: "logwatch::monitor",
                seconds = self.initial_pause.as_secs(),
                "Waiting for system to stabilize"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.initial_pause) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }

        loop {
            let timer = PerfTimer::with_threshold("monitor_cycle", SLOW_TICK_THRESHOLD_MS);
            match AssertUnwindSafe(self.cycle()).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(
                    target: "logwatch::monitor",
                    error = %e,
                    category = e.category(),
                    hint = ?e.recovery_hint(),
                    "Error during monitor cycle"
                ),
                Err(panic) => error!(
                    target: "logwatch::monitor",
                    panic = panic_message(&panic),
                    "Monitor cycle panicked"
                ),
            }
            timer.stop();

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!(target: "logwatch::monitor", kind = %self.profile.kind, "Monitor stopped");
        Ok(())
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::{MockProducerSource, MockQueueSource, MockStoreBackend};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Formatted log output shared with a test subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn line_containing(&self, needle: &str) -> String {
            let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            text.lines()
                .find(|line| line.contains(needle))
                .unwrap_or_else(|| panic!("no log line containing {needle:?} in:\n{text}"))
                .to_string()
        }
    }

    fn config(dir: &std::path::Path) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.producers.urls = vec!["http://server-1:8000/metrics".into()];
        config.monitor.snapshot_dir = dir.to_path_buf();
        config.monitor.initial_pause_secs = 0;
        config.monitor.poll_interval_secs = 1;
        config
    }

    fn healthy_store(processed: u64) -> MockStoreBackend {
        let mut store = MockStoreBackend::new();
        store.expect_ping().returning(|| Ok(()));
        store
            .expect_aggregate_counts()
            .returning(move |_, _| Ok((processed, processed)));
        store.expect_describe().returning(|| "mock".to_string());
        store
    }

    fn producer(generated: u64) -> MockProducerSource {
        let mut producer = MockProducerSource::new();
        producer
            .expect_fetch()
            .returning(move |_| Ok(format!("logs_generated_total {}\n", generated)));
        producer
    }

    fn queue(depth: u64) -> MockQueueSource {
        let mut queue = MockQueueSource::new();
        queue.expect_depth().returning(move || Ok(depth));
        queue
    }

    #[test]
    fn test_profiles() {
        let consistency = MonitorProfile::for_kind(MonitorKind::Consistency);
        assert_eq!(consistency.history_capacity, 10);
        assert_eq!(consistency.snapshot_file, "consistency_metrics.json");

        let performance = MonitorProfile::for_kind(MonitorKind::Performance);
        assert_eq!(performance.history_capacity, 60);
        assert_eq!(performance.default_metrics_port, 8091);
    }

    fn latency_report(latency_ms: f64) -> TickReport {
        let counts = BTreeMap::from([("server-1".to_string(), 1_000)]);
        let mut observation = Observation::new(Utc::now(), counts, Some(0), 500);
        observation.avg_latency_ms = Some(latency_ms);
        TickReport {
            observation,
            rates: None,
            trend: TrendVerdict::InsufficientData,
        }
    }

    #[test]
    fn test_latency_alert_levels() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let sources = SourceAdapter::new(
            &config,
            Arc::new(MockProducerSource::new()),
            Arc::new(MockStoreBackend::new()),
            Arc::new(MockQueueSource::new()),
        );
        let monitor = Monitor::new(MonitorProfile::performance(), &config, sources).unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            monitor.evaluate(&latency_report(750.0));
            monitor.evaluate(&latency_report(1_500.0));
        });

        let warning = logs.line_containing("exceeds warning threshold");
        assert!(warning.contains("WARN"), "{warning}");
        assert!(warning.contains("logwatch::alerts"));

        let critical = logs.line_containing("exceeds critical threshold");
        assert!(critical.contains("ERROR"), "{critical}");
        assert!(critical.contains("logwatch::alerts"));
    }

    #[tokio::test]
    async fn test_low_ratio_counts_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let sources = SourceAdapter::new(
            &config,
            Arc::new(producer(10_000)),
            Arc::new(healthy_store(6_000)),
            Arc::new(queue(0)),
        );
        let mut monitor = Monitor::new(MonitorProfile::consistency(), &config, sources).unwrap();

        let snapshot = monitor.cycle().await.unwrap();
        assert_eq!(snapshot.consistency_percentage, Some(60.0));
        assert_eq!(monitor.metrics().check_counters(), (1, 1));
        assert!(dir.path().join("consistency_metrics.json").exists());
    }

    #[tokio::test]
    async fn test_performance_snapshot_carries_health() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let sources = SourceAdapter::new(
            &config,
            Arc::new(producer(10_000)),
            Arc::new(healthy_store(9_000)),
            Arc::new(queue(10)),
        );
        let mut monitor = Monitor::new(MonitorProfile::performance(), &config, sources).unwrap();

        let snapshot = monitor.cycle().await.unwrap();
        let health = snapshot.trends.unwrap();
        assert_eq!(health.status, crate::HealthStatus::InsufficientData);
        assert_eq!(snapshot.recommendations, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_is_recoverable() {
        let config = config(std::path::Path::new("/nonexistent/logwatch"));
        let sources = SourceAdapter::new(
            &config,
            Arc::new(producer(100)),
            Arc::new(healthy_store(100)),
            Arc::new(queue(0)),
        );
        let mut monitor = Monitor::new(MonitorProfile::consistency(), &config, sources).unwrap();

        let err = monitor.cycle().await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(monitor.metrics().check_counters().0, 1);
    }

    #[tokio::test]
    async fn test_run_fails_fast_without_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut store = MockStoreBackend::new();
        store.expect_ping().returning(|| {
            Err(SourceError::Timeout {
                endpoint: "gateway".into(),
                timeout_ms: 5_000,
            })
        });
        store.expect_describe().returning(|| "mock".to_string());

        let sources = SourceAdapter::new(&config, Arc::new(producer(1)), Arc::new(store), Arc::new(queue(0)));
        let monitor = Monitor::new(MonitorProfile::consistency(), &config, sources).unwrap();

        let err = monitor.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.category(), "store_unavailable");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let sources = SourceAdapter::new(
            &config,
            Arc::new(producer(100)),
            Arc::new(healthy_store(100)),
            Arc::new(queue(0)),
        );
        let monitor = Monitor::new(MonitorProfile::consistency(), &config, sources).unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(monitor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        handle.await.unwrap().unwrap();
        assert!(dir.path().join("consistency_metrics.json").exists());
    }
}
