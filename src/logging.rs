// ============================================================================
// LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// Structured logging built on `tracing`:
// - Console output in pretty, compact or JSON format
// - Optional JSON file sink through a non-blocking appender
// - `RUST_LOG` overrides through `EnvFilter`
// ============================================================================

use std::path::Path;
use std::time::Instant;

use tracing::level_filters::LevelFilter;
use tracing::{info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{ConfigError, MonitorError, MonitorResult};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

// ----------------------------------------------------------------------------
// Logger Initialization
// ----------------------------------------------------------------------------

/// Keeps the file appender flushing; hold it for the life of the process.
#[derive(Debug, Default)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Map a textual level onto a filter, defaulting to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Initialize the global subscriber from configuration
pub fn init_logging(config: &LoggingConfig) -> MonitorResult<LoggingGuard> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(parse_level(&config.level).into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let mut guard = LoggingGuard::default();

    if let Some(path) = &config.file {
        let (layer, file_guard) = file_layer(path)?;
        layers.push(layer);
        guard._file = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| MonitorError::Internal(format!("Failed to set logger: {}", e)))?;

    info!(
        target: "logwatch::init",
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "Logging initialized"
    );

    Ok(guard)
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_names(true)
            .boxed(),
        "pretty" => fmt::layer()
            .pretty()
            .with_ansi(config.colors)
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .boxed(),
        _ => fmt::layer()
            .compact()
            .with_ansi(config.colors)
            .with_target(true)
            .boxed(),
    }
}

fn file_layer(path: &Path) -> MonitorResult<(BoxedLayer, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ConfigError::invalid_value("logging.file", "path has no file name"))?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer)
        .boxed();

    Ok((layer, guard))
}

// ----------------------------------------------------------------------------
// Logging Macros
// ----------------------------------------------------------------------------

/// Log an alert event on the `logwatch::alerts` target
#[macro_export]
macro_rules! log_alert {
    ($severity:expr, $message:expr) => {
        tracing::warn!(
            target: "logwatch::alerts",
            severity = %$severity,
            "{}", $message
        )
    };
    ($severity:expr, $message:expr, $($field:tt)*) => {
        tracing::warn!(
            target: "logwatch::alerts",
            severity = %$severity,
            $($field)*,
            "{}", $message
        )
    };
}

/// Log a critical alert at error level on the `logwatch::alerts` target
#[macro_export]
macro_rules! log_critical {
    ($severity:expr, $message:expr) => {
        tracing::error!(
            target: "logwatch::alerts",
            severity = %$severity,
            "{}", $message
        )
    };
    ($severity:expr, $message:expr, $($field:tt)*) => {
        tracing::error!(
            target: "logwatch::alerts",
            severity = %$severity,
            $($field)*,
            "{}", $message
        )
    };
}

// ----------------------------------------------------------------------------
// Performance Timer
// ----------------------------------------------------------------------------

/// Measures an operation and warns when it runs past a threshold
#[derive(Debug)]
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
    threshold_ms: Option<u64>,
    stopped: bool,
}

impl PerfTimer {
    /// Start a timer with a warning threshold
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms: Some(threshold_ms),
            stopped: false,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop the timer, warning if above threshold. Returns elapsed ms.
    pub fn stop(mut self) -> u64 {
        self.stopped = true;
        let elapsed = self.elapsed_ms();

        match self.threshold_ms {
            Some(threshold) if elapsed > threshold => warn!(
                target: "logwatch::perf",
                operation = self.name,
                elapsed_ms = elapsed,
                threshold_ms = threshold,
                "Operation exceeded threshold"
            ),
            _ => trace!(
                target: "logwatch::perf",
                operation = self.name,
                elapsed_ms = elapsed,
                "Operation completed"
            ),
        }

        elapsed
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !self.stopped {
            trace!(
                target: "logwatch::perf",
                operation = self.name,
                elapsed_ms = self.elapsed_ms(),
                "Timer dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("debug", LevelFilter::DEBUG)]
    #[case("WARNING", LevelFilter::WARN)]
    #[case("bogus", LevelFilter::INFO)]
    fn test_parse_level(#[case] input: &str, #[case] expected: LevelFilter) {
        assert_eq!(parse_level(input), expected);
    }

    #[test]
    fn test_perf_timer_reports_elapsed() {
        let timer = PerfTimer::with_threshold("tick", 10_000);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.stop() >= 5);
    }
}
