//! Nightly scheduler (spec §4.7): runs backup, penalty refresh, and
//! exchange-rate tasks in strict sequence once per calendar day, recording
//! the outcome as a [`BackupRunDocument`].
//!
//! Non-goal (spec §4.7): no cron/systemd-timer integration and no CLI
//! argument parser are implemented here — [`exit_code`] only documents the
//! process-exit contract spec §6.4 expects an external invoker to honor.

pub mod lease;
pub mod tasks;

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{instrument, warn};

use crate::context::ServiceContext;
use crate::domain::backup_run::{BackupRunDocument, OverallStatus, TaskRunResult, TaskStatus};
use crate::errors::Result;
use crate::store::SetOptions;
use tasks::ScheduledTask;

/// `--skip-backup` / `--skip-penalty` / `--skip-rates` (spec §6.4); an
/// external CLI wrapper would parse flags into this struct.
#[derive(Debug, Clone, Default)]
pub struct NightlyOptions {
    pub skip_backup: bool,
    pub skip_penalty: bool,
    pub skip_rates: bool,
}

async fn run_one(ctx: &ServiceContext, task: &dyn ScheduledTask, skip: bool) -> TaskRunResult {
    if skip {
        return TaskRunResult { status: TaskStatus::Skipped, duration_ms: 0 };
    }
    let start = Instant::now();
    let outcome = tokio::time::timeout(task.timeout(), task.run(ctx)).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(())) => TaskRunResult { status: TaskStatus::Success, duration_ms },
        Ok(Err(err)) => {
            warn!(task = task.name(), %err, "nightly task failed");
            TaskRunResult { status: TaskStatus::Failed { error: err.to_string() }, duration_ms }
        }
        Err(_) => {
            warn!(task = task.name(), timeout = ?task.timeout(), "nightly task timed out");
            TaskRunResult { status: TaskStatus::Failed { error: "timed out".to_string() }, duration_ms }
        }
    }
}

/// Acquire the day's lease and run the three tasks in order. If a run
/// already exists for `date` (lease held), returns the existing run log
/// instead of re-running (spec §4.7 re-entry semantics). Tasks always run
/// to completion even if an earlier one fails — spec §8 requires the
/// partial-failure state to reflect every task's individual outcome.
#[instrument(skip(ctx, backup_task, penalty_task, rate_task))]
pub async fn run_nightly(
    ctx: &ServiceContext,
    date: NaiveDate,
    backup_task: &dyn ScheduledTask,
    penalty_task: &dyn ScheduledTask,
    rate_task: &dyn ScheduledTask,
    options: &NightlyOptions,
) -> Result<BackupRunDocument> {
    let run_path = BackupRunDocument::store_path(date);
    if lease::acquire(ctx, date).await?.is_none() {
        if let Some(raw) = ctx.store.get_raw(&run_path).await? {
            let existing: BackupRunDocument = serde_json::from_value(raw)
                .map_err(|e| crate::errors::BillingError::validation(format!("malformed run log {run_path}: {e}")))?;
            return Ok(existing);
        }
        return Err(crate::errors::BillingError::Conflict { path: run_path });
    }

    let started_at = ctx.now();

    let backup = run_one(ctx, backup_task, options.skip_backup).await;
    let penalty_refresh = run_one(ctx, penalty_task, options.skip_penalty).await;
    let exchange_rate = run_one(ctx, rate_task, options.skip_rates).await;

    let finished_at = ctx.now();
    let duration_ms = backup.duration_ms + penalty_refresh.duration_ms + exchange_rate.duration_ms;
    let overall_status = BackupRunDocument::compute_overall(&[&backup, &penalty_refresh, &exchange_rate]);

    let doc = BackupRunDocument {
        date,
        started_at,
        finished_at,
        duration_ms,
        backup,
        penalty_refresh,
        exchange_rate,
        overall_status,
    };

    let value =
        serde_json::to_value(&doc).map_err(|e| crate::errors::BillingError::permanent(format!("encode {run_path}: {e}")))?;
    let mut batch = ctx.store.batch();
    batch.set(run_path, value, SetOptions::default());
    batch.commit().await?;

    Ok(doc)
}

/// spec §6.4: "exit 0 on full success, 2 on partial failure, 1 on a fatal
/// error that prevented the run from completing at all."
pub fn exit_code(result: &Result<BackupRunDocument>) -> i32 {
    match result {
        Ok(doc) => match doc.overall_status {
            OverallStatus::Success => 0,
            OverallStatus::PartialFailure => 2,
        },
        Err(_) => 1,
    }
}
