// ============================================================================
// SYNTHETIC PRODUCER
// ============================================================================
// Drives the pipeline with fabricated access-log lines. A fixed pool of
// workers each owns its own broker connection; workers share only the
// atomic generated counter and the exported series. Every worker retries
// forever with a doubling backoff and stops only on cancellation.
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fake::faker::internet::en::IPv4;
use fake::Fake;
use prometheus::IntGauge;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{GeneratorConfig, MonitorConfig, QueueConfig};
use crate::error::{SinkResult, SourceError, SourceResult};
use crate::metrics::ProducerMetrics;
use crate::source::encode_segment;

// ----------------------------------------------------------------------------
// Log Line Factory
// ----------------------------------------------------------------------------

const HTTP_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];
const ENDPOINTS: [&str; 5] = ["/api/users", "/api/products", "/api/orders", "/home", "/admin"];
const HTTP_STATUSES: [u16; 8] = [200, 200, 200, 200, 201, 400, 404, 500];
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "curl/8.4.0",
];

/// Client addresses drawn once per process
const IP_POOL_SIZE: usize = 100;

/// Progress is logged each time the shared total crosses a multiple of this
const PROGRESS_LOG_EVERY: u64 = 10_000;

fn pick<T: Copy>(items: &[T]) -> T {
    items[(0..items.len()).fake::<usize>()]
}

/// Fabricates combined-log-format lines stamped with a server identity.
#[derive(Debug, Clone)]
pub struct LogLineFactory {
    server_id: String,
    ips: Vec<String>,
}

impl LogLineFactory {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            ips: (0..IP_POOL_SIZE).map(|_| IPv4().fake::<String>()).collect(),
        }
    }

    pub fn line(&self) -> String {
        let ip = &self.ips[(0..self.ips.len()).fake::<usize>()];
        let bytes: u32 = (200..=5000).fake();
        format!(
            "{}: {} - - [{}] \"{} {} HTTP/1.1\" {} {} \"-\" \"{}\"",
            self.server_id,
            ip,
            Utc::now().format("%d/%b/%Y:%H:%M:%S +0000"),
            pick(&HTTP_METHODS),
            pick(&ENDPOINTS),
            pick(&HTTP_STATUSES),
            bytes,
            pick(&USER_AGENTS),
        )
    }

    pub fn batch(&self, size: usize) -> Vec<String> {
        (0..size).map(|_| self.line()).collect()
    }
}

// ----------------------------------------------------------------------------
// Broker Connection
// ----------------------------------------------------------------------------

/// Opens a fresh connection to the broker. Each worker owns the channel it
/// gets back; nothing is shared between workers.
#[async_trait]
pub trait QueueConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> SourceResult<Box<dyn QueueChannel>>;
}

#[async_trait]
pub trait QueueChannel: Send {
    async fn publish(&mut self, payload: &str) -> SourceResult<()>;
}

#[derive(Debug, Deserialize)]
struct PublishReply {
    routed: bool,
}

/// Publishes through the broker's management API to the default exchange.
#[derive(Debug, Clone)]
pub struct RabbitMqPublisher {
    queue_url: String,
    publish_url: String,
    user: String,
    password: String,
    queue: String,
    timeout: Duration,
}

impl RabbitMqPublisher {
    pub fn new(config: &QueueConfig) -> Self {
        let vhost = encode_segment(&config.vhost);
        Self {
            queue_url: format!("{}/api/queues/{}/{}", config.base_url(), vhost, encode_segment(&config.name)),
            publish_url: format!("{}/api/exchanges/{}/amq.default/publish", config.base_url(), vhost),
            user: config.user.clone(),
            password: config.password.clone(),
            queue: config.name.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl QueueConnector for RabbitMqPublisher {
    async fn connect(&self) -> SourceResult<Box<dyn QueueChannel>> {
        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| SourceError::ConnectionFailed {
                endpoint: self.queue_url.clone(),
                message: e.to_string(),
            })?;
        let timeout_ms = self.timeout.as_millis() as u64;

        // Declare is idempotent for identical arguments
        let response = client
            .put(&self.queue_url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({ "durable": true }))
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&self.queue_url, timeout_ms, e))?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                endpoint: self.queue_url.clone(),
                status: response.status().as_u16(),
            });
        }

        Ok(Box::new(RabbitMqChannel {
            client,
            publisher: self.clone(),
            timeout_ms,
        }))
    }
}

struct RabbitMqChannel {
    client: Client,
    publisher: RabbitMqPublisher,
    timeout_ms: u64,
}

#[async_trait]
impl QueueChannel for RabbitMqChannel {
    async fn publish(&mut self, payload: &str) -> SourceResult<()> {
        let target = &self.publisher;
        let body = json!({
            "properties": { "delivery_mode": 1 },
            "routing_key": target.queue,
            "payload": payload,
            "payload_encoding": "string",
        });

        let response = self
            .client
            .post(&target.publish_url)
            .basic_auth(&target.user, Some(&target.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&target.publish_url, self.timeout_ms, e))?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                endpoint: target.publish_url.clone(),
                status: response.status().as_u16(),
            });
        }

        let reply: PublishReply = response.json().await.map_err(|e| SourceError::InvalidResponse {
            endpoint: target.publish_url.clone(),
            message: e.to_string(),
        })?;

        if !reply.routed {
            return Err(SourceError::InvalidResponse {
                endpoint: target.publish_url.clone(),
                message: format!("message not routed to queue '{}'", target.queue),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// Doubling backoff, short for connection-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub transient: Duration,
    pub unexpected: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self {
            transient: Duration::from_millis(config.transient_backoff_ms),
            unexpected: Duration::from_millis(config.unexpected_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before the next attempt; `consecutive` counts failures so far, starting at 1.
    pub fn delay(&self, error: &SourceError, consecutive: u32) -> Duration {
        let base = if error.is_connection_level() {
            self.transient
        } else {
            self.unexpected
        };
        let factor = 1u32.checked_shl(consecutive.saturating_sub(1)).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

// ----------------------------------------------------------------------------
// Worker Pool
// ----------------------------------------------------------------------------

/// Keeps `active_workers` accurate even when a worker unwinds
struct ActiveWorker<'a>(&'a IntGauge);

impl<'a> ActiveWorker<'a> {
    fn enter(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

#[derive(Debug)]
struct Shared {
    settings: GeneratorConfig,
    policy: RetryPolicy,
    connector: Arc<dyn QueueConnector>,
    factory: LogLineFactory,
    metrics: ProducerMetrics,
    generated: AtomicU64,
}

impl Shared {
    /// Publish batches until something fails. Never returns `Ok`.
    async fn session(&self, worker: usize, failures: &mut u32) -> SourceResult<()> {
        let mut channel = self.connector.connect().await?;
        debug!(target: "logwatch::generator", worker, "Connected to broker");

        let emission_delay = Duration::from_millis(self.settings.emission_delay_ms);
        loop {
            let batch = self.factory.batch(self.settings.batch_size);
            for line in &batch {
                channel.publish(line).await?;
                self.metrics.logs_sent.inc();
            }
            if !emission_delay.is_zero() {
                tokio::time::sleep(emission_delay).await;
            }

            let len = batch.len() as u64;
            let before = self.generated.fetch_add(len, Ordering::Relaxed);
            self.metrics.logs_generated.inc_by(len);
            let total = before + len;
            if total / PROGRESS_LOG_EVERY > before / PROGRESS_LOG_EVERY {
                info!(target: "logwatch::generator", worker, total, "Generated logs");
            }
            *failures = 0;
        }
    }
}

async fn worker(id: usize, shared: Arc<Shared>, cancel: CancellationToken) -> usize {
    let _active = ActiveWorker::enter(&shared.metrics.active_workers);
    info!(target: "logwatch::generator", worker = id, "Worker started");

    let mut failures: u32 = 0;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = shared.session(id, &mut failures) => outcome,
        };
        let Err(err) = outcome else { continue };

        failures = failures.saturating_add(1);
        shared.metrics.connection_errors.inc();
        let delay = shared.policy.delay(&err, failures);

        if err.is_connection_level() {
            warn!(
                target: "logwatch::generator",
                worker = id,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Broker connection error, reconnecting"
            );
        } else {
            error!(
                target: "logwatch::generator",
                worker = id,
                error = %err,
                failures,
                retry_in_ms = delay.as_millis() as u64,
                "Unexpected publishing error, reconnecting"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(target: "logwatch::generator", worker = id, "Worker stopped");
    id
}

/// Supervised pool of publishing workers
#[derive(Debug, Clone)]
pub struct Generator {
    shared: Arc<Shared>,
}

impl Generator {
    pub fn new(settings: GeneratorConfig, connector: Arc<dyn QueueConnector>) -> SinkResult<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                policy: RetryPolicy::from_config(&settings),
                factory: LogLineFactory::new(settings.server_id.clone()),
                metrics: ProducerMetrics::new()?,
                generated: AtomicU64::new(0),
                connector,
                settings,
            }),
        })
    }

    pub fn from_config(config: &MonitorConfig) -> SinkResult<Self> {
        Self::new(config.generator.clone(), Arc::new(RabbitMqPublisher::new(&config.queue)))
    }

    pub fn metrics(&self) -> &ProducerMetrics {
        &self.shared.metrics
    }

    /// Records published in complete batches since start
    pub fn generated_total(&self) -> u64 {
        self.shared.generated.load(Ordering::Relaxed)
    }

    /// Run the pool until `cancel` fires. A panicking worker is replaced.
    pub async fn run(&self, cancel: CancellationToken) {
        let settings = &self.shared.settings;
        info!(
            target: "logwatch::generator",
            server_id = %settings.server_id,
            workers = settings.workers,
            batch_size = settings.batch_size,
            emission_delay_ms = settings.emission_delay_ms,
            "Starting log generator"
        );

        let mut workers = JoinSet::new();
        for id in 0..settings.workers {
            workers.spawn(worker(id, Arc::clone(&self.shared), cancel.clone()));
        }

        let mut next_id = settings.workers;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(id) => debug!(target: "logwatch::generator", worker = id, "Worker joined"),
                Err(e) if e.is_panic() && !cancel.is_cancelled() => {
                    error!(target: "logwatch::generator", error = %e, worker = next_id, "Worker panicked, respawning");
                    workers.spawn(worker(next_id, Arc::clone(&self.shared), cancel.clone()));
                    next_id += 1;
                }
                Err(e) => warn!(target: "logwatch::generator", error = %e, "Worker ended abnormally"),
            }
        }

        info!(target: "logwatch::generator", generated = self.generated_total(), "Log generator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_log_line_shape() {
        let factory = LogLineFactory::new("server-7");
        let line = factory.line();

        assert!(line.starts_with("server-7: "));
        assert!(line.contains(" - - ["));
        assert!(line.contains(" HTTP/1.1\" "));
        assert!(line.ends_with('"'));
        assert!(HTTP_METHODS.iter().any(|m| line.contains(&format!("\"{} /", m))));
        assert!(USER_AGENTS.iter().any(|a| line.ends_with(&format!("\"{}\"", a))));

        let status: u16 = line.split("HTTP/1.1\" ").nth(1).unwrap()[..3].parse().unwrap();
        assert!(HTTP_STATUSES.contains(&status));
        assert_eq!(factory.batch(25).len(), 25);
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&GeneratorConfig::default())
    }

    fn refused() -> SourceError {
        SourceError::ConnectionFailed {
            endpoint: "http://rabbitmq:15672".into(),
            message: "connection refused".into(),
        }
    }

    fn rejected() -> SourceError {
        SourceError::HttpStatus {
            endpoint: "http://rabbitmq:15672".into(),
            status: 500,
        }
    }

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(4, 16)]
    #[case(5, 32)]
    #[case(6, 60)]
    #[case(40, 60)]
    fn test_transient_backoff_doubles_and_caps(#[case] consecutive: u32, #[case] secs: u64) {
        assert_eq!(policy().delay(&refused(), consecutive), Duration::from_secs(secs));
    }

    #[rstest]
    #[case(1, 5)]
    #[case(2, 10)]
    #[case(4, 40)]
    #[case(5, 60)]
    fn test_unexpected_backoff_is_longer(#[case] consecutive: u32, #[case] secs: u64) {
        assert_eq!(policy().delay(&rejected(), consecutive), Duration::from_secs(secs));
    }

    // ---- Fake broker ----

    #[derive(Clone, Default)]
    struct Broker {
        declared: Arc<AtomicUsize>,
        published: Arc<AtomicUsize>,
    }

    async fn declare(State(broker): State<Broker>, Path((_vhost, _name)): Path<(String, String)>) -> StatusCode {
        broker.declared.fetch_add(1, Ordering::SeqCst);
        StatusCode::CREATED
    }

    async fn publish(
        State(broker): State<Broker>,
        Path(_vhost): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        if body["routing_key"] == "unbound" {
            return Json(json!({ "routed": false }));
        }
        broker.published.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "routed": true }))
    }

    async fn broker() -> (Broker, QueueConfig) {
        let state = Broker::default();
        let app = Router::new()
            .route("/api/queues/:vhost/:name", put(declare))
            .route("/api/exchanges/:vhost/amq.default/publish", post(publish))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = QueueConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeout_secs: 2,
            ..QueueConfig::default()
        };
        (state, config)
    }

    fn settings(workers: usize, batch_size: usize) -> GeneratorConfig {
        GeneratorConfig {
            server_id: "server-test".into(),
            workers,
            batch_size,
            emission_delay_ms: 1,
            transient_backoff_ms: 5,
            unexpected_backoff_ms: 5,
            max_backoff_ms: 20,
        }
    }

    async fn run_until(generator: &Generator, at_least: u64) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let generator = generator.clone();
            let cancel = cancel.clone();
            async move { generator.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            while generator.generated_total() < at_least {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_workers_publish_to_broker() {
        let (broker, config) = broker().await;
        let generator = Generator::new(settings(2, 5), Arc::new(RabbitMqPublisher::new(&config))).unwrap();

        run_until(&generator, 20).await;

        let generated = generator.generated_total();
        assert_eq!(generated % 5, 0);
        assert!(broker.published.load(Ordering::SeqCst) as u64 >= generated);
        assert!(broker.declared.load(Ordering::SeqCst) >= 2);
        assert_eq!(generator.metrics().logs_generated.get(), generated);
        assert_eq!(generator.metrics().active_workers.get(), 0);
        assert_eq!(generator.metrics().connection_errors.get(), 0);
    }

    #[tokio::test]
    async fn test_unrouted_publish_is_rejected() {
        let (_broker, config) = broker().await;
        let config = QueueConfig {
            name: "unbound".into(),
            ..config
        };

        let mut channel = RabbitMqPublisher::new(&config).connect().await.unwrap();
        let err = channel.publish("line").await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse { .. }));
    }

    // ---- Flaky connector ----

    #[derive(Debug)]
    struct FlakyConnector {
        attempts: AtomicUsize,
        fail_first: usize,
    }

    struct NullChannel;

    #[async_trait]
    impl QueueChannel for NullChannel {
        async fn publish(&mut self, _payload: &str) -> SourceResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl QueueConnector for FlakyConnector {
        async fn connect(&self) -> SourceResult<Box<dyn QueueChannel>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(refused());
            }
            Ok(Box::new(NullChannel))
        }
    }

    #[tokio::test]
    async fn test_worker_recovers_after_connection_failures() {
        let connector = Arc::new(FlakyConnector {
            attempts: AtomicUsize::new(0),
            fail_first: 2,
        });
        let generator = Generator::new(settings(1, 10), connector.clone()).unwrap();

        run_until(&generator, 30).await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(generator.metrics().connection_errors.get(), 2);
        assert!(generator.metrics().logs_sent.get() >= 30);
        assert_eq!(generator.metrics().active_workers.get(), 0);
    }
}
