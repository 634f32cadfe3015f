//! Run reporting.
//!
//! Each pipeline run writes a `report.json` with per-stage outcomes so
//! partial batch failures are inspectable after the fact.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pool::BatchSummary;

use super::stage::PipelineStage;

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

/// Record of one executed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Which stage ran.
    pub stage: PipelineStage,
    /// Whether it completed.
    pub status: StageStatus,
    /// Failure reason or notable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Batch summary for the parallel stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSummary>,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
}

/// Full record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished (success or failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Stage records in execution order.
    pub stages: Vec<StageReport>,
    /// Selected checkpoint path, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_checkpoint: Option<PathBuf>,
    /// Loss of the selected checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_loss: Option<f64>,
    /// Final packaged model path, once produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packaged_model: Option<PathBuf>,
}

impl PipelineReport {
    /// Starts a new report.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            best_checkpoint: None,
            best_loss: None,
            packaged_model: None,
        }
    }

    /// Records a completed stage.
    pub fn record_completed(
        &mut self,
        stage: PipelineStage,
        duration: Duration,
        batch: Option<BatchSummary>,
    ) {
        self.stages.push(StageReport {
            stage,
            status: StageStatus::Completed,
            detail: None,
            batch,
            duration_secs: duration.as_secs_f64(),
        });
    }

    /// Records a failed stage with its reason.
    pub fn record_failed(&mut self, stage: PipelineStage, duration: Duration, reason: &str) {
        self.stages.push(StageReport {
            stage,
            status: StageStatus::Failed,
            detail: Some(reason.to_string()),
            batch: None,
            duration_secs: duration.as_secs_f64(),
        });
    }

    /// Last stage that completed, if any.
    pub fn last_completed(&self) -> Option<PipelineStage> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.status == StageStatus::Completed)
            .map(|s| s.stage)
    }

    /// Marks the run as finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Writes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::other(format!("failed to serialize report: {}", e)))?;
        std::fs::write(path, json)
    }
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_last_completed_tracks_progress() {
        let mut report = PipelineReport::new();
        assert!(report.last_completed().is_none());

        report.record_completed(PipelineStage::GenerateSamples, Duration::from_secs(1), None);
        report.record_completed(PipelineStage::ConvertFormat, Duration::from_secs(1), None);
        report.record_failed(
            PipelineStage::BuildManifest,
            Duration::ZERO,
            "no training artifacts",
        );

        assert_eq!(report.last_completed(), Some(PipelineStage::ConvertFormat));
    }

    #[test]
    fn test_save_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("report.json");

        let mut report = PipelineReport::new();
        report.record_completed(
            PipelineStage::GenerateSamples,
            Duration::from_secs(2),
            Some(BatchSummary {
                total: 5,
                succeeded: 4,
                failed: 1,
            }),
        );
        report.best_checkpoint = Some(PathBuf::from("/tmp/m_0.31_1_2.checkpoint"));
        report.best_loss = Some(0.31);
        report.finish();
        report.save(&path).unwrap();

        let loaded: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.stages.len(), 1);
        assert_eq!(loaded.stages[0].batch.unwrap().succeeded, 4);
        assert_eq!(loaded.best_loss, Some(0.31));
        assert!(loaded.finished_at.is_some());
    }
}
