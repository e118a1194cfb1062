// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// Observation records, derived rate estimates and trend labels shared by the
// engine, the classifier and the snapshot publisher.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Observation - One Reconciliation Sample
// ----------------------------------------------------------------------------

/// One timestamped reconciliation sample.
///
/// `ratio` is `None` whenever `adjusted_generated` is not positive, so a
/// sample without signal stays distinguishable from a recorded 0%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Instant of capture
    pub timestamp: DateTime<Utc>,

    /// Sum of the generated counters of every reachable producer
    pub generated: u64,

    /// Messages resident in the queue; `None` when the broker was unreachable
    pub queue_depth: Option<u64>,

    /// `generated - queue_depth`, or `generated` when the depth is unknown
    pub adjusted_generated: i64,

    /// Canonical store count
    pub processed: u64,

    /// `processed / adjusted_generated * 100`
    #[serde(rename = "consistency_percentage")]
    pub ratio: Option<f64>,

    /// Generated count per producer identity
    pub per_server_counts: BTreeMap<String, u64>,

    /// Records processed per second since the previous sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_rate: Option<f64>,

    /// Average milliseconds per processed record since the previous sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,

    /// Queue depth change per second since the previous sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_growth_rate: Option<f64>,
}

impl Observation {
    /// Build a sample from raw counts, deriving the adjusted count and ratio.
    pub fn new(
        timestamp: DateTime<Utc>,
        per_server_counts: BTreeMap<String, u64>,
        queue_depth: Option<u64>,
        processed: u64,
    ) -> Self {
        let generated: u64 = per_server_counts.values().sum();
        let adjusted_generated = adjusted_generated(generated, queue_depth);
        let ratio = consistency_ratio(processed, adjusted_generated);

        Self {
            timestamp,
            generated,
            queue_depth,
            adjusted_generated,
            processed,
            ratio,
            per_server_counts,
            processing_rate: None,
            avg_latency_ms: None,
            queue_growth_rate: None,
        }
    }

    /// True when a ratio could be computed for this sample
    #[inline]
    pub fn has_signal(&self) -> bool {
        self.ratio.is_some()
    }

    /// Attach rates derived against the previous sample
    pub fn with_rates(mut self, rates: &RateEstimate) -> Self {
        self.processing_rate = rates.processing_rate;
        self.avg_latency_ms = rates.avg_latency_ms;
        self.queue_growth_rate = rates.queue_growth_rate;
        self
    }
}

/// Generated count minus the current queue depth.
///
/// Subtracts the depth from a cumulative total, so this approximates the
/// backlog rather than measuring it. May be negative under poll skew.
pub fn adjusted_generated(generated: u64, queue_depth: Option<u64>) -> i64 {
    let generated = i64::try_from(generated).unwrap_or(i64::MAX);
    match queue_depth {
        Some(depth) => generated.saturating_sub(i64::try_from(depth).unwrap_or(i64::MAX)),
        None => generated,
    }
}

/// Percentage of adjusted generated records that reached the store.
pub fn consistency_ratio(processed: u64, adjusted_generated: i64) -> Option<f64> {
    if adjusted_generated > 0 {
        Some(processed as f64 / adjusted_generated as f64 * 100.0)
    } else {
        None
    }
}

// ----------------------------------------------------------------------------
// Rate Estimate - Derived Per-Tick Rates
// ----------------------------------------------------------------------------

/// Rates derived from two consecutive observations
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    pub elapsed_secs: f64,
    pub logs_delta: i64,
    pub processing_rate: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub queue_growth_rate: Option<f64>,
}

impl RateEstimate {
    /// Derive rates between `prev` and `current`.
    ///
    /// Returns the empty estimate when no time has elapsed. Latency is only
    /// defined for a positive processed delta.
    pub fn between(prev: &Observation, current: &Observation) -> Self {
        let elapsed_secs = (current.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs <= 0.0 {
            return Self::default();
        }

        let logs_delta = current.processed as i64 - prev.processed as i64;
        let processing_rate = Some(logs_delta as f64 / elapsed_secs);
        let avg_latency_ms = (logs_delta > 0).then(|| elapsed_secs * 1000.0 / logs_delta as f64);

        let queue_growth_rate = match (prev.queue_depth, current.queue_depth) {
            (Some(before), Some(now)) => Some((now as f64 - before as f64) / elapsed_secs),
            _ => None,
        };

        Self {
            elapsed_secs,
            logs_delta,
            processing_rate,
            avg_latency_ms,
            queue_growth_rate,
        }
    }
}

// ----------------------------------------------------------------------------
// Trend Verdict
// ----------------------------------------------------------------------------

/// Direction of the most recent samples of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendVerdict {
    InsufficientData,
    Improving,
    Degrading,
    Stable,
}

impl TrendVerdict {
    /// Classify a series in temporal order.
    ///
    /// Strictly increasing is improving, strictly decreasing is degrading,
    /// anything else is stable. Fewer than two values is insufficient.
    pub fn from_series(values: &[f64]) -> Self {
        if values.len() < 2 {
            return TrendVerdict::InsufficientData;
        }

        if values.windows(2).all(|w| w[0] < w[1]) {
            TrendVerdict::Improving
        } else if values.windows(2).all(|w| w[0] > w[1]) {
            TrendVerdict::Degrading
        } else {
            TrendVerdict::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendVerdict::InsufficientData => "insufficient_data",
            TrendVerdict::Improving => "improving",
            TrendVerdict::Degrading => "degrading",
            TrendVerdict::Stable => "stable",
        }
    }
}

impl Display for TrendVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn sample(at: DateTime<Utc>, generated: u64, queue: Option<u64>, processed: u64) -> Observation {
        let counts = BTreeMap::from([("server-1".to_string(), generated)]);
        Observation::new(at, counts, queue, processed)
    }

    #[test]
    fn test_queue_adjusted_ratio() {
        let obs = sample(Utc::now(), 10_000, Some(2_000), 8_000);
        assert_eq!(obs.adjusted_generated, 8_000);
        assert_eq!(obs.ratio, Some(100.0));
    }

    #[test]
    fn test_unknown_depth_uses_raw_generated() {
        let obs = sample(Utc::now(), 1_000, None, 500);
        assert_eq!(obs.adjusted_generated, 1_000);
        assert_eq!(obs.ratio, Some(50.0));
    }

    #[test]
    fn test_non_positive_adjusted_has_no_ratio() {
        let all_queued = sample(Utc::now(), 1_000, Some(1_000), 0);
        assert_eq!(all_queued.adjusted_generated, 0);
        assert!(!all_queued.has_signal());

        let skewed = sample(Utc::now(), 1_000, Some(1_500), 10);
        assert_eq!(skewed.adjusted_generated, -500);
        assert_eq!(skewed.ratio, None);
    }

    #[test]
    fn test_zero_processed_is_a_recorded_zero() {
        let obs = sample(Utc::now(), 1_000, Some(0), 0);
        assert_eq!(obs.ratio, Some(0.0));
    }

    #[test]
    fn test_rate_and_latency() {
        let start = Utc::now();
        let prev = sample(start, 2_000, Some(100), 1_000);
        let current = sample(start + Duration::seconds(50), 2_600, Some(600), 1_500);

        let rates = RateEstimate::between(&prev, &current);
        assert_eq!(rates.processing_rate, Some(10.0));
        assert_eq!(rates.avg_latency_ms, Some(100.0));
        assert_eq!(rates.queue_growth_rate, Some(10.0));
    }

    #[test]
    fn test_no_latency_without_progress() {
        let start = Utc::now();
        let prev = sample(start, 2_000, None, 1_000);
        let current = sample(start + Duration::seconds(30), 2_100, None, 1_000);

        let rates = RateEstimate::between(&prev, &current);
        assert_eq!(rates.processing_rate, Some(0.0));
        assert_eq!(rates.avg_latency_ms, None);
        assert_eq!(rates.queue_growth_rate, None);
    }

    #[test]
    fn test_zero_elapsed_yields_no_rates() {
        let at = Utc::now();
        let rates = RateEstimate::between(&sample(at, 10, None, 1), &sample(at, 20, None, 5));
        assert_eq!(rates, RateEstimate::default());
    }

    #[rstest]
    #[case(&[70.0, 75.0, 80.0], TrendVerdict::Improving)]
    #[case(&[80.0, 75.0, 70.0], TrendVerdict::Degrading)]
    #[case(&[80.0, 70.0, 80.0], TrendVerdict::Stable)]
    #[case(&[80.0, 80.0], TrendVerdict::Stable)]
    #[case(&[90.0], TrendVerdict::InsufficientData)]
    #[case(&[], TrendVerdict::InsufficientData)]
    fn test_trend_from_series(#[case] values: &[f64], #[case] expected: TrendVerdict) {
        assert_eq!(TrendVerdict::from_series(values), expected);
    }

    #[test]
    fn test_trend_serializes_snake_case() {
        let json = serde_json::to_string(&TrendVerdict::InsufficientData).unwrap();
        assert_eq!(json, "\"insufficient_data\"");
    }
}
