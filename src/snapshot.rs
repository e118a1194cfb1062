// ============================================================================
// SNAPSHOT PUBLISHER
// ============================================================================
// Periodic JSON document describing the latest reconciliation state. One
// tick produces exactly one snapshot, overwritten in place with a single
// write. Write failures are reported to the caller, who logs and continues.
// ============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::{HealthAssessment, HealthStatus};
use crate::engine::TickReport;
use crate::error::{SinkError, SinkResult};
use crate::monitor::MonitorKind;
use crate::types::{Observation, RateEstimate, TrendVerdict};

/// Published reconciliation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub monitor: MonitorKind,
    pub current: Observation,
    pub processed_logs_total: u64,
    pub generated_logs_total: u64,
    pub queue_depth: Option<u64>,
    /// `consistency_percentage / 100`
    pub consistency_ratio: Option<f64>,
    pub consistency_percentage: Option<f64>,
    pub estimated_queue_processing_time_seconds: Option<f64>,
    pub rates: Option<RateEstimate>,
    pub trend: TrendVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trends: Option<HealthAssessment>,
    pub historical_data: Vec<Observation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
}

impl Snapshot {
    pub fn new(kind: MonitorKind, report: &TickReport, historical_data: Vec<Observation>) -> Self {
        let current = report.observation.clone();
        Self {
            timestamp: Utc::now(),
            monitor: kind,
            processed_logs_total: current.processed,
            generated_logs_total: current.generated,
            queue_depth: current.queue_depth,
            consistency_ratio: current.ratio.map(|r| r / 100.0),
            consistency_percentage: current.ratio,
            estimated_queue_processing_time_seconds: None,
            rates: report.rates,
            trend: report.trend,
            trends: None,
            historical_data,
            recommendations: None,
            current,
        }
    }

    pub fn with_drain_estimate(mut self, seconds: Option<f64>) -> Self {
        self.estimated_queue_processing_time_seconds = seconds;
        self
    }

    /// Attach the health assessment and the recommendations it implies
    pub fn with_health(mut self, health: HealthAssessment) -> Self {
        self.recommendations = Some(recommendations(&health));
        self.trends = Some(health);
        self
    }
}

/// Operator advice for a health assessment
pub fn recommendations(health: &HealthAssessment) -> Vec<String> {
    match health.status {
        HealthStatus::Critical => vec![
            "Critical: consider scaling the analyzer component".to_string(),
            "Check analyzer logs for errors or stalls".to_string(),
        ],
        HealthStatus::AtRisk => {
            let mut advice = vec!["Attention required: monitor queue growth".to_string()];
            if health.queue_trend == TrendVerdict::Degrading {
                advice.push("Queue growing: processing may be under-provisioned for current load".to_string());
            }
            advice
        }
        HealthStatus::Healthy | HealthStatus::InsufficientData => Vec::new(),
    }
}

/// Writes snapshots to a well-known file
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    path: PathBuf,
}

impl SnapshotPublisher {
    /// Publisher writing `file_name` inside `directory`
    pub fn new(directory: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: directory.as_ref().join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize and overwrite the snapshot file in a single write
    pub async fn publish(&self, snapshot: &Snapshot) -> SinkResult<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|source| SinkError::SnapshotWrite {
                path: self.path.clone(),
                source,
            })?;

        debug!(target: "logwatch::snapshot", path = %self.path.display(), "Metrics exported");
        Ok(())
    }

    /// Read back the last published snapshot
    pub async fn load(&self) -> SinkResult<Snapshot> {
        let body = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SinkError::SnapshotRead {
                path: self.path.clone(),
                source,
            })?;
        Ok(serde_json::from_slice(&body)?)
    }
}
