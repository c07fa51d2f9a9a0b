use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TaskStatus {
    Success,
    Failed { error: String },
    /// Recorded when a task is skipped via the scheduler CLI's `--skip-*`
    /// flags (spec §6.4); distinct from `Failed` since it's not an error.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunResult {
    pub status: TaskStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialFailure,
}

/// One document per calendar date, recording the nightly scheduler's
/// outcome (spec §3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRunDocument {
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub backup: TaskRunResult,
    pub penalty_refresh: TaskRunResult,
    pub exchange_rate: TaskRunResult,
    pub overall_status: OverallStatus,
}

impl BackupRunDocument {
    pub fn store_path(date: NaiveDate) -> String {
        format!("/system/nightlyScheduler/runs/{date}")
    }

    pub fn compute_overall(results: &[&TaskRunResult]) -> OverallStatus {
        if results.iter().all(|r| matches!(r.status, TaskStatus::Success | TaskStatus::Skipped)) {
            OverallStatus::Success
        } else {
            OverallStatus::PartialFailure
        }
    }
}
