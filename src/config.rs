// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Configuration layering:
// - Built-in defaults
// - Optional TOML file
// - Environment variable overrides (LOGWATCH_ prefix, `__` between sections)
// ============================================================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::*;

// ----------------------------------------------------------------------------
// Root Configuration
// ----------------------------------------------------------------------------

/// Root configuration shared by the monitors and the generator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Durable store (aggregates written by the analyzer)
    #[serde(default)]
    pub store: StoreConfig,

    /// Producer exposition endpoints
    #[serde(default)]
    pub producers: ProducersConfig,

    /// Queue broker
    #[serde(default)]
    pub queue: QueueConfig,

    /// Tick loop settings
    #[serde(default)]
    pub monitor: LoopConfig,

    /// Alerting thresholds
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// Metrics exporter
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Synthetic producer
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MonitorConfig {
    /// Load configuration from an optional file with environment overrides.
    ///
    /// A missing file is only an error when `require_file` is set; otherwise
    /// defaults and the environment are used.
    pub fn load<P: AsRef<Path>>(path: P, require_file: bool) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if require_file && !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::from(Serialized::defaults(MonitorConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LOGWATCH_").split("__"));

        Self::extract(figment)
    }

    /// Load from a TOML string, still honouring defaults (for testing).
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let figment =
            Figment::from(Serialized::defaults(MonitorConfig::default())).merge(Toml::string(toml_str));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.producers.urls.is_empty() {
            return Err(ConfigError::missing_field("producers.urls"));
        }

        if self.store.url.trim().is_empty() {
            return Err(ConfigError::missing_field("store.url"));
        }

        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "monitor.poll_interval_secs",
                "poll interval must be at least 1 second",
            ));
        }

        for (field, secs) in [
            ("store.timeout_secs", self.store.timeout_secs),
            ("producers.timeout_secs", self.producers.timeout_secs),
            ("queue.timeout_secs", self.queue.timeout_secs),
        ] {
            if secs == 0 || secs > MAX_SOURCE_TIMEOUT_SECS {
                return Err(ConfigError::invalid_value(
                    field,
                    format!("timeout must be between 1 and {}s", MAX_SOURCE_TIMEOUT_SECS),
                ));
            }
        }

        if self.thresholds.ratio_low >= self.thresholds.ratio_high {
            return Err(ConfigError::invalid_value(
                "thresholds.ratio_low",
                format!(
                    "low threshold ({}) must be below high threshold ({})",
                    self.thresholds.ratio_low, self.thresholds.ratio_high
                ),
            ));
        }

        if self.thresholds.latency_warning_ms >= self.thresholds.latency_critical_ms {
            return Err(ConfigError::invalid_value(
                "thresholds.latency_warning_ms",
                format!(
                    "warning threshold ({}ms) must be below critical threshold ({}ms)",
                    self.thresholds.latency_warning_ms, self.thresholds.latency_critical_ms
                ),
            ));
        }

        if self.generator.workers == 0 {
            return Err(ConfigError::invalid_value("generator.workers", "need at least one worker"));
        }

        if self.generator.batch_size == 0 {
            return Err(ConfigError::invalid_value("generator.batch_size", "batch size must be positive"));
        }

        Ok(())
    }

    /// Render the default configuration as TOML
    pub fn generate_default_config() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Store Configuration
// ----------------------------------------------------------------------------

/// Durable store reached through the log gateway's aggregate listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Gateway base URL (the store connection string)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Database holding the aggregates
    #[serde(default = "default_store_database")]
    pub database: String,

    /// Collection holding the aggregates
    #[serde(default = "default_store_collection")]
    pub collection: String,

    /// First aggregate dimension (records grouped by client IP)
    #[serde(default = "default_primary_category")]
    pub primary_category: String,

    /// Second aggregate dimension (records grouped by endpoint)
    #[serde(default = "default_secondary_category")]
    pub secondary_category: String,

    /// Request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            database: default_store_database(),
            collection: default_store_collection(),
            primary_category: default_primary_category(),
            secondary_category: default_secondary_category(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_store_url() -> String {
    "http://gateway:8080".into()
}

fn default_store_database() -> String {
    "logs_db".into()
}

fn default_store_collection() -> String {
    "logs".into()
}

fn default_primary_category() -> String {
    "ip".into()
}

fn default_secondary_category() -> String {
    "endpoint".into()
}

fn default_source_timeout() -> u64 {
    MAX_SOURCE_TIMEOUT_SECS
}

// ----------------------------------------------------------------------------
// Producers Configuration
// ----------------------------------------------------------------------------

/// Producer exposition endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducersConfig {
    /// Metrics URLs; accepts a list or a comma-separated string
    #[serde(default = "default_producer_urls", deserialize_with = "deserialize_url_list")]
    pub urls: Vec<String>,

    /// Counter holding each producer's generated total
    #[serde(default = "default_counter_name")]
    pub counter: String,

    /// Request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProducersConfig {
    fn default() -> Self {
        Self {
            urls: default_producer_urls(),
            counter: default_counter_name(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_producer_urls() -> Vec<String> {
    vec!["http://python-server:8000/metrics".into()]
}

fn default_counter_name() -> String {
    GENERATED_COUNTER_NAME.into()
}

/// Split a comma-separated URL list, dropping blanks.
pub fn split_url_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn deserialize_url_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UrlListVisitor;

    impl<'de> Visitor<'de> for UrlListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of URLs or a comma-separated string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(split_url_list(v))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut urls = Vec::new();
            while let Some(url) = seq.next_element::<String>()? {
                urls.extend(split_url_list(&url));
            }
            Ok(urls)
        }
    }

    deserializer.deserialize_any(UrlListVisitor)
}

// ----------------------------------------------------------------------------
// Queue Configuration
// ----------------------------------------------------------------------------

/// Queue broker reached through its management API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_host")]
    pub host: String,

    /// Management API port
    #[serde(default = "default_queue_port")]
    pub port: u16,

    #[serde(default = "default_queue_user")]
    pub user: String,

    #[serde(default = "default_queue_user")]
    pub password: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Queue the producers publish to
    #[serde(default = "default_queue_name")]
    pub name: String,

    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: default_queue_host(),
            port: default_queue_port(),
            user: default_queue_user(),
            password: default_queue_user(),
            vhost: default_vhost(),
            name: default_queue_name(),
            timeout_secs: default_source_timeout(),
        }
    }
}

impl QueueConfig {
    /// Management API base URL
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_queue_host() -> String {
    "rabbitmq".into()
}

fn default_queue_port() -> u16 {
    15672
}

fn default_queue_user() -> String {
    "guest".into()
}

fn default_vhost() -> String {
    "/".into()
}

fn default_queue_name() -> String {
    "logs".into()
}

// ----------------------------------------------------------------------------
// Loop Configuration
// ----------------------------------------------------------------------------

/// Tick loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Seconds between ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds to wait before the first tick
    #[serde(default = "default_initial_pause")]
    pub initial_pause_secs: u64,

    /// Documented allowance for analyzer lag; reported at startup only
    #[serde(default = "default_delay_allowance")]
    pub processing_delay_allowance_secs: u64,

    /// Directory receiving the JSON snapshots
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            initial_pause_secs: default_initial_pause(),
            processing_delay_allowance_secs: default_delay_allowance(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

impl LoopConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_pause(&self) -> Duration {
        Duration::from_secs(self.initial_pause_secs)
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_initial_pause() -> u64 {
    DEFAULT_INITIAL_PAUSE_SECS
}

fn default_delay_allowance() -> u64 {
    DEFAULT_PROCESSING_DELAY_ALLOWANCE_SECS
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_DIR)
}

// ----------------------------------------------------------------------------
// Thresholds Configuration
// ----------------------------------------------------------------------------

/// Alerting thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    /// Consistency ratio below this is low (percent)
    #[serde(default = "default_ratio_low")]
    pub ratio_low: f64,

    /// Consistency ratio above this is high (percent)
    #[serde(default = "default_ratio_high")]
    pub ratio_high: f64,

    #[serde(default = "default_latency_warning")]
    pub latency_warning_ms: f64,

    #[serde(default = "default_latency_critical")]
    pub latency_critical_ms: f64,

    /// Queue depth that makes an at-risk pipeline critical
    #[serde(default = "default_queue_critical_depth")]
    pub queue_critical_depth: u64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            ratio_low: default_ratio_low(),
            ratio_high: default_ratio_high(),
            latency_warning_ms: default_latency_warning(),
            latency_critical_ms: default_latency_critical(),
            queue_critical_depth: default_queue_critical_depth(),
        }
    }
}

fn default_ratio_low() -> f64 {
    DEFAULT_RATIO_LOW
}

fn default_ratio_high() -> f64 {
    DEFAULT_RATIO_HIGH
}

fn default_latency_warning() -> f64 {
    DEFAULT_LATENCY_WARNING_MS
}

fn default_latency_critical() -> f64 {
    DEFAULT_LATENCY_CRITICAL_MS
}

fn default_queue_critical_depth() -> u64 {
    DEFAULT_QUEUE_CRITICAL_DEPTH
}

// ----------------------------------------------------------------------------
// Metrics Exporter Configuration
// ----------------------------------------------------------------------------

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Listen host
    #[serde(default = "default_metrics_host")]
    pub host: String,

    /// Listen port; each process falls back to its own default when unset
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: None,
        }
    }
}

impl MetricsConfig {
    /// Listen address, using `fallback_port` when no port is configured
    pub fn address(&self, fallback_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(fallback_port))
    }
}

fn default_metrics_host() -> String {
    "0.0.0.0".into()
}

// ----------------------------------------------------------------------------
// Generator Configuration
// ----------------------------------------------------------------------------

/// Synthetic producer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Identity stamped on every fabricated line
    #[serde(default = "default_server_id")]
    pub server_id: String,

    /// Number of independent publishing workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Records per published batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay after each batch (milliseconds)
    #[serde(default = "default_emission_delay")]
    pub emission_delay_ms: u64,

    /// Backoff after a connection-level failure (milliseconds)
    #[serde(default = "default_transient_backoff")]
    pub transient_backoff_ms: u64,

    /// Backoff after any other failure (milliseconds)
    #[serde(default = "default_unexpected_backoff")]
    pub unexpected_backoff_ms: u64,

    /// Upper bound for the doubled backoff (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            emission_delay_ms: default_emission_delay(),
            transient_backoff_ms: default_transient_backoff(),
            unexpected_backoff_ms: default_unexpected_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_server_id() -> String {
    "unknown".into()
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    50
}

fn default_emission_delay() -> u64 {
    1
}

fn default_transient_backoff() -> u64 {
    2_000
}

fn default_unexpected_backoff() -> u64 {
    5_000
}

fn default_max_backoff() -> u64 {
    60_000
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also append logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "compact".into()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults() {
        let config = MonitorConfig::default();

        assert_eq!(config.monitor.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.thresholds.ratio_low, 80.0);
        assert_eq!(config.thresholds.ratio_high, 120.0);
        assert_eq!(config.producers.counter, "logs_generated_total");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_comma_separated_producer_urls() {
        let config = MonitorConfig::from_toml_str(
            r#"
            [producers]
            urls = "http://server-1:8000/metrics, http://server-2:8000/metrics,"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.producers.urls,
            vec![
                "http://server-1:8000/metrics".to_string(),
                "http://server-2:8000/metrics".to_string(),
            ]
        );
    }

    #[test]
    fn test_list_producer_urls() {
        let config = MonitorConfig::from_toml_str(
            r#"
            [producers]
            urls = ["http://a:8000/metrics", "http://b:8000/metrics"]
            "#,
        )
        .unwrap();
        assert_eq!(config.producers.urls.len(), 2);
    }

    #[test]
    fn test_inverted_ratio_thresholds_rejected() {
        let err = MonitorConfig::from_toml_str(
            r#"
            [thresholds]
            ratio_low = 130.0
            ratio_high = 120.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "thresholds.ratio_low"));
    }

    #[test]
    fn test_timeout_above_bound_rejected() {
        let err = MonitorConfig::from_toml_str(
            r#"
            [queue]
            timeout_secs = 30
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "queue.timeout_secs"));
    }

    #[test]
    fn test_missing_required_file() {
        let err = MonitorConfig::load("/nonexistent/logwatch.toml", true).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_generated_config_round_trips() {
        let rendered = MonitorConfig::generate_default_config();
        let parsed = MonitorConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.queue.name, "logs");
        assert_eq!(parsed.metrics.address(8091), "0.0.0.0:8091");
    }
}
