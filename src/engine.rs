// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================
// One tick: gather counts, adjust for queued work, derive rates against the
// previous sample and append to the rolling history. The first tick after
// start never has a rate baseline.
// ============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::history::HistoryStore;
use crate::source::{GeneratedCounts, SourceAdapter, StoreCount};
use crate::types::{Observation, RateEstimate, TrendVerdict};

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// The observation appended to history, rates attached
    pub observation: Observation,
    /// Rates against the previous sample; `None` on cold start
    pub rates: Option<RateEstimate>,
    /// Ratio trend after appending
    pub trend: TrendVerdict,
}

/// Owns the history of one monitor and the sources feeding it.
#[derive(Debug)]
pub struct ReconciliationEngine {
    sources: SourceAdapter,
    history: HistoryStore,
}

impl ReconciliationEngine {
    pub fn new(sources: SourceAdapter, capacity: usize) -> Self {
        Self {
            sources,
            history: HistoryStore::new(capacity),
        }
    }

    pub fn sources(&self) -> &SourceAdapter {
        &self.sources
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Poll every source and record the resulting observation.
    ///
    /// Never fails: source errors have already degraded to zero or unknown.
    pub async fn tick(&mut self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Poll every source and stamp the observation with `timestamp`.
    pub async fn tick_at(&mut self, timestamp: DateTime<Utc>) -> TickReport {
        let store = self.sources.fetch_store_count().await;
        let generated = self.sources.fetch_generated().await;
        let queue_depth = self.sources.fetch_queue_depth().await;

        self.observe(timestamp, generated, store, queue_depth)
    }

    /// Record an observation built from already-fetched counts.
    pub fn observe(
        &mut self,
        timestamp: DateTime<Utc>,
        generated: GeneratedCounts,
        store: StoreCount,
        queue_depth: Option<u64>,
    ) -> TickReport {
        let mut observation = Observation::new(timestamp, generated.per_server, queue_depth, store.canonical);

        match queue_depth {
            Some(depth) => info!(target: "logwatch::engine", depth, "Current queue depth"),
            None => debug!(target: "logwatch::engine", "Queue depth unknown, using raw generated count"),
        }

        info!(
            target: "logwatch::engine",
            generated = observation.generated,
            adjusted = observation.adjusted_generated,
            processed = observation.processed,
            servers = observation.per_server_counts.len(),
            "Reconciled counts"
        );

        if !observation.has_signal() {
            warn!(
                target: "logwatch::engine",
                adjusted = observation.adjusted_generated,
                "No signal: no logs generated yet or all logs are still in queue"
            );
        }

        let rates = self
            .history
            .latest()
            .map(|prev| RateEstimate::between(prev, &observation))
            .filter(|r| r.elapsed_secs > 0.0);

        if let Some(rates) = &rates {
            observation = observation.with_rates(rates);
        }

        self.history.append(observation.clone());
        let trend = self.history.trend();

        TickReport {
            observation,
            rates,
            trend,
        }
    }

    /// Seconds to drain the current queue at the speed observed across the
    /// whole history.
    pub fn estimate_drain_seconds(&self) -> Option<f64> {
        let (first, last) = (self.history.oldest()?, self.history.latest()?);
        let elapsed = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
        if self.history.len() < 2 || elapsed <= 0.0 {
            return None;
        }

        let speed = (last.processed as f64 - first.processed as f64) / elapsed;
        if speed <= 0.0 {
            return None;
        }
        last.queue_depth.map(|depth| depth as f64 / speed)
    }
}
