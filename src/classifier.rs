// ============================================================================
// THRESHOLD CLASSIFICATION
// ============================================================================
// Pure mapping from derived values plus trend labels to severity verdicts.
// Thresholds are configuration; nothing here touches metrics or logs.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ThresholdsConfig;
use crate::types::{Observation, TrendVerdict};
use crate::HEALTH_WINDOW;

// ----------------------------------------------------------------------------
// Verdicts
// ----------------------------------------------------------------------------

/// Outcome of the consistency-ratio check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyVerdict {
    Ok,
    /// Below the low threshold but recovering; warn only
    LowButImproving,
    /// Below the low threshold and not recovering; likely data loss
    LowAlert,
    /// Above the high threshold; likely duplicate processing
    HighAlert,
}

impl ConsistencyVerdict {
    /// Whether this verdict increments the consistency error counter
    #[inline]
    pub fn counts_as_error(&self) -> bool {
        matches!(self, ConsistencyVerdict::LowAlert | ConsistencyVerdict::HighAlert)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyVerdict::Ok => "ok",
            ConsistencyVerdict::LowButImproving => "low_but_improving",
            ConsistencyVerdict::LowAlert => "low_alert",
            ConsistencyVerdict::HighAlert => "high_alert",
        }
    }
}

impl Display for ConsistencyVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the per-record latency check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyVerdict {
    Ok,
    Warning,
    Critical,
}

impl LatencyVerdict {
    /// Above the warning threshold (true for critical samples too)
    #[inline]
    pub fn breaches_warning(&self) -> bool {
        !matches!(self, LatencyVerdict::Ok)
    }

    #[inline]
    pub fn breaches_critical(&self) -> bool {
        matches!(self, LatencyVerdict::Critical)
    }
}

impl Display for LatencyVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LatencyVerdict::Ok => write!(f, "ok"),
            LatencyVerdict::Warning => write!(f, "warning"),
            LatencyVerdict::Critical => write!(f, "critical"),
        }
    }
}

/// Composite pipeline health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    InsufficientData,
    Healthy,
    AtRisk,
    Critical,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::InsufficientData => write!(f, "insufficient_data"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::AtRisk => write!(f, "at_risk"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Health verdict over the recent window, with the trends that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub status: HealthStatus,
    pub processing_trend: TrendVerdict,
    pub queue_trend: TrendVerdict,
    pub analysis_time: DateTime<Utc>,
}

impl HealthAssessment {
    fn insufficient(analysis_time: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::InsufficientData,
            processing_trend: TrendVerdict::InsufficientData,
            queue_trend: TrendVerdict::InsufficientData,
            analysis_time,
        }
    }
}

// ----------------------------------------------------------------------------
// Classifier
// ----------------------------------------------------------------------------

/// Applies configured thresholds to ratios, latencies and health windows.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdClassifier {
    thresholds: ThresholdsConfig,
}

impl ThresholdClassifier {
    pub fn new(thresholds: ThresholdsConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdsConfig {
        &self.thresholds
    }

    /// Classify a consistency ratio (percent) given the current ratio trend.
    pub fn classify(&self, ratio: f64, trend: TrendVerdict) -> ConsistencyVerdict {
        if ratio < self.thresholds.ratio_low {
            if trend == TrendVerdict::Improving {
                ConsistencyVerdict::LowButImproving
            } else {
                ConsistencyVerdict::LowAlert
            }
        } else if ratio > self.thresholds.ratio_high {
            ConsistencyVerdict::HighAlert
        } else {
            ConsistencyVerdict::Ok
        }
    }

    /// Classify an average per-record latency in milliseconds.
    pub fn classify_latency(&self, latency_ms: f64) -> LatencyVerdict {
        if latency_ms > self.thresholds.latency_critical_ms {
            LatencyVerdict::Critical
        } else if latency_ms > self.thresholds.latency_warning_ms {
            LatencyVerdict::Warning
        } else {
            LatencyVerdict::Ok
        }
    }

    /// Fold processing and queue trends over the last observations into a
    /// health status.
    ///
    /// `window` must be in temporal order; only its last `HEALTH_WINDOW`
    /// entries are considered. The processing trend follows the cumulative
    /// processed count, so any steady progress reads as improving.
    pub fn assess_health(&self, window: &[&Observation], now: DateTime<Utc>) -> HealthAssessment {
        if window.len() < HEALTH_WINDOW {
            return HealthAssessment::insufficient(now);
        }
        let window = &window[window.len() - HEALTH_WINDOW..];

        let processed: Vec<f64> = window.iter().map(|o| o.processed as f64).collect();
        let processing_trend = TrendVerdict::from_series(&processed);

        let queue_trend = queue_trend(window);

        let status = if queue_trend == TrendVerdict::Degrading && processing_trend != TrendVerdict::Improving {
            let overloaded = window
                .iter()
                .filter_map(|o| o.queue_depth)
                .any(|depth| depth > self.thresholds.queue_critical_depth);
            if overloaded {
                HealthStatus::Critical
            } else {
                HealthStatus::AtRisk
            }
        } else if processing_trend == TrendVerdict::Degrading {
            HealthStatus::AtRisk
        } else {
            HealthStatus::Healthy
        };

        HealthAssessment {
            status,
            processing_trend,
            queue_trend,
            analysis_time: now,
        }
    }
}

/// A draining queue is an improving pipeline. Unknown depths anywhere in
/// the window make the trend stable.
fn queue_trend(window: &[&Observation]) -> TrendVerdict {
    let depths: Option<Vec<f64>> = window.iter().map(|o| o.queue_depth.map(|d| d as f64)).collect();

    match depths.map(|d| TrendVerdict::from_series(&d)) {
        Some(TrendVerdict::Improving) => TrendVerdict::Degrading,
        Some(TrendVerdict::Degrading) => TrendVerdict::Improving,
        _ => TrendVerdict::Stable,
    }
}
