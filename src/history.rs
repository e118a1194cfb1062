// ============================================================================
// OBSERVATION HISTORY
// ============================================================================
// Fixed-capacity rolling window of observations:
// - Insertion order is temporal order
// - Oldest entry evicted once capacity is exceeded
// - Owned by exactly one engine; mutated only by the tick that appends
// ============================================================================

use std::collections::VecDeque;

use crate::types::{Observation, TrendVerdict};
use crate::TREND_WINDOW;

/// Bounded FIFO of observations.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<Observation>,
    capacity: usize,
}

impl HistoryStore {
    /// Create an empty history. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append an observation, evicting the oldest entries beyond capacity.
    pub fn append(&mut self, observation: Observation) {
        self.entries.push_back(observation);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The last `min(k, len)` entries, oldest first.
    pub fn recent(&self, k: usize) -> Vec<&Observation> {
        let skip = self.entries.len().saturating_sub(k);
        self.entries.iter().skip(skip).collect()
    }

    /// Owned copy of the last `k` entries, oldest first.
    pub fn tail(&self, k: usize) -> Vec<Observation> {
        self.recent(k).into_iter().cloned().collect()
    }

    /// Trend of the consistency ratio over the last ratio-bearing samples.
    ///
    /// Samples recorded without signal carry no ratio and are skipped.
    pub fn trend(&self) -> TrendVerdict {
        let mut ratios: Vec<f64> = self
            .entries
            .iter()
            .rev()
            .filter_map(|o| o.ratio)
            .take(TREND_WINDOW)
            .collect();
        ratios.reverse();
        TrendVerdict::from_series(&ratios)
    }

    #[inline]
    pub fn latest(&self) -> Option<&Observation> {
        self.entries.back()
    }

    #[inline]
    pub fn oldest(&self) -> Option<&Observation> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Observation> + '_ {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn observation(seq: i64, generated: u64, processed: u64) -> Observation {
        let counts = BTreeMap::from([("server-1".to_string(), generated)]);
        Observation::new(Utc::now() + Duration::seconds(seq), counts, Some(0), processed)
    }

    fn with_ratio(seq: i64, ratio: u64) -> Observation {
        observation(seq, 100, ratio)
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = HistoryStore::new(10);
        for seq in 0..15 {
            history.append(observation(seq, 100, seq as u64));
        }

        assert_eq!(history.len(), history.capacity());
        let processed: Vec<u64> = history.iter().map(|o| o.processed).collect();
        assert_eq!(processed, (5..15).collect::<Vec<u64>>());
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut history = HistoryStore::new(10);
        for seq in 0..4 {
            history.append(observation(seq, 100, seq as u64));
        }

        let recent: Vec<u64> = history.recent(3).iter().map(|o| o.processed).collect();
        assert_eq!(recent, vec![1, 2, 3]);
        assert_eq!(history.recent(10).len(), 4);
        assert!(HistoryStore::new(5).recent(3).is_empty());
    }

    #[test]
    fn test_trend_over_last_three() {
        let mut history = HistoryStore::new(10);
        assert_eq!(history.trend(), TrendVerdict::InsufficientData);

        history.append(with_ratio(0, 90));
        assert_eq!(history.trend(), TrendVerdict::InsufficientData);

        for (seq, ratio) in [(1, 70), (2, 75), (3, 80)] {
            history.append(with_ratio(seq, ratio));
        }
        assert_eq!(history.trend(), TrendVerdict::Improving);

        for (seq, ratio) in [(4, 75), (5, 70)] {
            history.append(with_ratio(seq, ratio));
        }
        assert_eq!(history.trend(), TrendVerdict::Degrading);

        history.append(with_ratio(6, 80));
        assert_eq!(history.trend(), TrendVerdict::Stable);
    }

    #[test]
    fn test_trend_skips_samples_without_signal() {
        let mut history = HistoryStore::new(10);
        history.append(with_ratio(0, 70));
        history.append(with_ratio(1, 75));

        let counts = BTreeMap::from([("server-1".to_string(), 100)]);
        let no_signal = Observation::new(Utc::now(), counts, Some(100), 80);
        assert!(!no_signal.has_signal());
        history.append(no_signal);

        history.append(with_ratio(3, 80));
        assert_eq!(history.trend(), TrendVerdict::Improving);
    }
}
