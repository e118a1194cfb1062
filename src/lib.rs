//! # Logwatch - Ingestion Pipeline Reconciliation
//!
//! Monitors for a log-ingestion pipeline in which synthetic producers push
//! log records into a broker queue and a downstream analyzer aggregates them
//! into a store. Two monitors continuously reconcile "how many logs were
//! generated" against "how many were durably processed" and publish derived
//! health metrics.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              LOGWATCH MONITOR                             │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  SOURCES → RECONCILIATION ENGINE → HISTORY → CLASSIFIER → PUBLISHER       │
//! │  (producers, store, queue)              (gauges, counters, JSON snapshot) │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The consistency and performance monitors are the same [`monitor::Monitor`]
//! parameterized by a [`monitor::MonitorProfile`]. The [`generator`] module
//! contains the synthetic producer used to drive the pipeline.

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod exposition;
pub mod generator;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod snapshot;
pub mod source;
pub mod types;

pub use classifier::{ConsistencyVerdict, HealthAssessment, HealthStatus, LatencyVerdict, ThresholdClassifier};
pub use config::MonitorConfig;
pub use engine::{ReconciliationEngine, TickReport};
pub use error::{MonitorError, MonitorResult};
pub use history::HistoryStore;
pub use monitor::{Monitor, MonitorKind, MonitorProfile};
pub use types::{Observation, RateEstimate, TrendVerdict};

// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Crate version - follows semantic versioning
pub const LOGWATCH_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LOGWATCH_NAME: &str = "logwatch";
pub const LOGWATCH_FULL_NAME: &str = "Logwatch Pipeline Monitor";

// ----------------------------------------------------------------------------
// History & Trend Windows
// ----------------------------------------------------------------------------

/// Observations retained by the consistency monitor
pub const CONSISTENCY_HISTORY_CAPACITY: usize = 10;

/// Observations retained by the performance monitor (rate tracking)
pub const PERFORMANCE_HISTORY_CAPACITY: usize = 60;

/// Samples considered when classifying a ratio/rate trend
pub const TREND_WINDOW: usize = 3;

/// Samples considered by the composite health assessment
pub const HEALTH_WINDOW: usize = 5;

/// Observations written to the consistency snapshot
pub const CONSISTENCY_SNAPSHOT_TAIL: usize = 5;

/// Observations written to the performance snapshot
pub const PERFORMANCE_SNAPSHOT_TAIL: usize = 10;

// ----------------------------------------------------------------------------
// Timing & Intervals
// ----------------------------------------------------------------------------

/// Default poll interval between ticks (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default pause before the first tick so the pipeline can settle (seconds)
pub const DEFAULT_INITIAL_PAUSE_SECS: u64 = 30;

/// Upper bound for every call to an external dependency (seconds)
pub const MAX_SOURCE_TIMEOUT_SECS: u64 = 5;

/// Default processing-delay allowance (seconds)
pub const DEFAULT_PROCESSING_DELAY_ALLOWANCE_SECS: u64 = 120;

/// Tick duration above which a warning is logged (milliseconds)
pub const SLOW_TICK_THRESHOLD_MS: u64 = 10_000;

// ----------------------------------------------------------------------------
// Thresholds
// ----------------------------------------------------------------------------

/// Ratio below which consistency is considered low (percent)
pub const DEFAULT_RATIO_LOW: f64 = 80.0;

/// Ratio above which consistency is considered high (percent)
pub const DEFAULT_RATIO_HIGH: f64 = 120.0;

/// Per-record latency warning threshold (milliseconds)
pub const DEFAULT_LATENCY_WARNING_MS: f64 = 500.0;

/// Per-record latency critical threshold (milliseconds)
pub const DEFAULT_LATENCY_CRITICAL_MS: f64 = 1000.0;

/// Queue depth that escalates an at-risk assessment to critical
pub const DEFAULT_QUEUE_CRITICAL_DEPTH: u64 = 1000;

/// Latency histogram buckets (milliseconds)
pub const LATENCY_BUCKETS_MS: [f64; 7] = [50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0];

// ----------------------------------------------------------------------------
// Network & Protocol
// ----------------------------------------------------------------------------

/// Counter scraped from every producer's exposition endpoint
pub const GENERATED_COUNTER_NAME: &str = "logs_generated_total";

/// Default consistency monitor exporter port
pub const DEFAULT_CONSISTENCY_METRICS_PORT: u16 = 8080;

/// Default performance monitor exporter port
pub const DEFAULT_PERFORMANCE_METRICS_PORT: u16 = 8091;

/// Default producer exporter port
pub const DEFAULT_GENERATOR_PORT: u16 = 8000;

/// Default directory for JSON snapshots
pub const DEFAULT_SNAPSHOT_DIR: &str = "/metrics";
