//! The Reaper — a deployment-wide singleton that sweeps for lapsed
//! heartbeat leases and orphaned work.
//!
//! Lease acquisition uses the same compare-and-swap-via-`UPDATE` idiom as
//! `db::repository::reaper::try_acquire`; losing the race is not an
//! error, it just means another process is already reaping this tick.

use std::time::Duration;

use db::{
    repository::{reaper as reaper_repo, task_instances, tasks, workflow_runs},
    DbPool,
};
use engine::status::{TaskInstanceStatus, TaskStatus};
use engine::transitions::{self, WorkflowRunStatusCode};
use tracing::{info, instrument, warn};

use crate::error::QueueError;
use crate::heartbeat::next_deadline;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub scan_interval: Duration,
    pub lease_ttl: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self { scan_interval: Duration::from_secs(30), lease_ttl: Duration::from_secs(90) }
    }
}

/// Runs the Reaper loop forever. `holder` identifies this process for the
/// lease row; a caller typically passes a hostname/pid
/// string. Intended to be spawned as its own task and never joined.
pub struct Reaper {
    pool: DbPool,
    holder: String,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(pool: DbPool, holder: impl Into<String>, config: ReaperConfig) -> Self {
        Self { pool, holder: holder.into(), config }
    }

    #[instrument(skip(self), fields(holder = %self.holder))]
    pub async fn run_forever(&self) -> ! {
        loop {
            match self.tick().await {
                Ok(swept) if swept > 0 => info!(swept, "reaper swept stale state"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "reaper tick failed"),
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run one sweep if this process currently holds (or can acquire) the
    /// lease; returns the count of rows it transitioned. Exposed
    /// separately from `run_forever` so callers can drive it directly in
    /// tests or a one-shot CLI invocation.
    pub async fn tick(&self) -> Result<usize, QueueError> {
        let expires_at = next_deadline(self.config.lease_ttl);
        let lease = reaper_repo::try_acquire(&self.pool, &self.holder, expires_at).await?;
        if lease.is_none() {
            return Ok(0);
        }

        let mut swept = 0;
        swept += self.sweep_stale_workflow_runs().await?;
        swept += self.sweep_stale_task_instances().await?;
        swept += self.sweep_orphaned_tasks().await?;
        Ok(swept)
    }

    /// Scan 1: WorkflowRuns whose lease lapsed transition to
    /// `C` if any in-flight TaskInstance has no recoverable scheduler
    /// handle, otherwise `H`.
    async fn sweep_stale_workflow_runs(&self) -> Result<usize, QueueError> {
        let stale = workflow_runs::list_stale_workflow_runs(&self.pool).await?;
        let mut count = 0;

        for run in stale {
            let unrecoverable =
                task_instances::count_unrecoverable_in_flight(&self.pool, run.workflow_id).await?;
            let target = if unrecoverable > 0 {
                WorkflowRunStatusCode::ColdResume
            } else {
                WorkflowRunStatusCode::Halted
            };

            match transitions::transition_workflow_run(&self.pool, run.id, target).await {
                Ok(_) => count += 1,
                Err(engine::EngineError::InvalidTransition { .. }) => {
                    // Already moved on (raced with the owning Run
                    // Controller); not an error for the Reaper.
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(count)
    }

    /// Scan 2: TaskInstances in `{I, O, R}` whose lease lapsed and whose
    /// WorkflowRun is no longer current transition to `X`, cascading per
    /// the Transition Service.
    async fn sweep_stale_task_instances(&self) -> Result<usize, QueueError> {
        let stale = task_instances::list_stale_non_current(&self.pool).await?;
        let mut count = 0;

        for ti in stale {
            match transitions::transition_task_instance(
                &self.pool,
                ti.id,
                TaskInstanceStatus::NoHeartbeat,
                None,
                None,
            )
            .await
            {
                Ok(_) => count += 1,
                Err(engine::EngineError::InvalidTransition { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(count)
    }

    /// Scan 3: non-terminal Tasks whose Workflow has no current
    /// WorkflowRun left to progress them are forced to `F` via the
    /// administrative override path — nothing will ever transition them
    /// otherwise, and the Workflow roll-up would stay non-terminal
    /// forever.
    async fn sweep_orphaned_tasks(&self) -> Result<usize, QueueError> {
        let orphaned = tasks::list_orphaned_non_terminal(&self.pool).await?;
        let mut count = 0;

        for task in orphaned {
            transitions::override_task_status(&self.pool, task.id, TaskStatus::Fatal).await?;
            count += 1;
        }

        Ok(count)
    }

    pub async fn release(&self) -> Result<(), QueueError> {
        reaper_repo::release(&self.pool, &self.holder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lease_ttl_exceeds_scan_interval() {
        let config = ReaperConfig::default();
        assert!(config.lease_ttl > config.scan_interval, "a lease shorter than the scan cadence would starve itself");
    }
}
