//! Run Controller ("Swarm") — one instance per WorkflowRun.
//!
//! Has no exclusive database lock of its own; correctness comes from
//! transition validation plus the heartbeat lease. Multiple controllers
//! for *different* WorkflowRuns run in parallel; a controller is
//! single-logical-thread with respect to its own WorkflowRun.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::{
    hash::hash_json,
    models::TaskRow,
    repository::{task_instances, tasks, workflow_runs, workflows},
    DbError, DbPool,
};
use nodes::traits::{BatchSubmission, ProbeStatus, TaskCommand};
use nodes::DistributorAdapter;
use tracing::{info, instrument, warn};

use crate::models::BatchKey;
use crate::status::{TaskInstanceStatus, TaskStatus, WorkflowStatus};
use crate::transitions::{self, ErrorDetail, WorkflowRunStatusCode};
use crate::EngineError;

/// Tuning knobs for one controller run.
#[derive(Debug, Clone)]
pub struct RunControllerConfig {
    pub poll_interval: Duration,
    pub seconds_until_timeout: Option<u64>,
    pub fail_fast: bool,
    pub heartbeat_interval: Duration,
}

impl Default for RunControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            seconds_until_timeout: None,
            fail_fast: false,
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of a controller run — the final Workflow roll-up, or the
/// reason the controller exited before reaching one.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Terminal(WorkflowStatus),
    TimedOut,
    LeaseRevoked,
}

pub struct RunController {
    pool: DbPool,
    workflow_id: i64,
    workflow_run_id: i64,
    config: RunControllerConfig,
    adapter: Arc<dyn DistributorAdapter>,
}

impl RunController {
    pub fn new(
        pool: DbPool,
        workflow_id: i64,
        workflow_run_id: i64,
        config: RunControllerConfig,
        adapter: Arc<dyn DistributorAdapter>,
    ) -> Self {
        Self { pool, workflow_id, workflow_run_id, config, adapter }
    }

    /// Drive the WorkflowRun to completion, timeout, or lease loss
    ///.
    #[instrument(skip(self), fields(workflow_id = self.workflow_id, workflow_run_id = self.workflow_run_id))]
    pub async fn run(&self) -> Result<RunOutcome, EngineError> {
        let started = Utc::now();

        loop {
            if let Some(timeout_secs) = self.config.seconds_until_timeout {
                let elapsed = (Utc::now() - started).num_seconds().max(0) as u64;
                if elapsed >= timeout_secs {
                    // Halted, not failed, even if a Task is still running —
                    // in-flight TaskInstances are left for the Reaper
                    //.
                    transitions::transition_workflow_run(
                        &self.pool,
                        self.workflow_run_id,
                        WorkflowRunStatusCode::Halted,
                    )
                    .await?;
                    return Ok(RunOutcome::TimedOut);
                }
            }

            let run = workflow_runs::get_workflow_run(&self.pool, self.workflow_run_id)
                .await
                .map_err(EngineError::Database)?;
            if !matches!(run.status.as_str(), "G" | "B") {
                return Ok(RunOutcome::LeaseRevoked);
            }

            let rows = tasks::list_tasks_for_workflow(&self.pool, self.workflow_id)
                .await
                .map_err(EngineError::Database)?;

            let statuses: Vec<TaskStatus> = rows
                .iter()
                .filter_map(|t| t.status.chars().next().and_then(TaskStatus::from_char))
                .collect();
            let rollup = crate::status::roll_up_workflow_status(&statuses);

            if self.config.fail_fast && rows.iter().any(|t| t.status == "F") {
                transitions::transition_workflow_run(
                    &self.pool,
                    self.workflow_run_id,
                    WorkflowRunStatusCode::Failed,
                )
                .await?;
                return Ok(RunOutcome::Terminal(WorkflowStatus::Failed));
            }

            if matches!(rollup, WorkflowStatus::Done | WorkflowStatus::Failed) {
                transitions::transition_workflow_run(
                    &self.pool,
                    self.workflow_run_id,
                    if rollup == WorkflowStatus::Done {
                        WorkflowRunStatusCode::Done
                    } else {
                        WorkflowRunStatusCode::Failed
                    },
                )
                .await?;
                return Ok(RunOutcome::Terminal(rollup));
            }

            self.observe_in_flight(&rows).await?;
            self.dispatch_eligible(&rows).await?;
            self.refresh_heartbeat().await?;

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Compute the eligible set and issue queue-batch requests: group queued Tasks by (Array, resource
    /// fingerprint, queue) and submit each group as one batch.
    async fn dispatch_eligible(&self, rows: &[TaskRow]) -> Result<(), EngineError> {
        let workflow = workflows::get_workflow(&self.pool, self.workflow_id)
            .await
            .map_err(EngineError::Database)?;

        let workflow_running = tasks::count_running_for_workflow(&self.pool, self.workflow_id)
            .await
            .map_err(EngineError::Database)?;
        let mut headroom = workflow.max_concurrently_running as i64 - workflow_running;
        if headroom <= 0 {
            return Ok(());
        }

        let mut batches: HashMap<BatchKey, Vec<&TaskRow>> = HashMap::new();
        for task in rows.iter().filter(|t| t.status == "Q") {
            let fingerprint = hash_json(&task.compute_resources);
            let queue = primary_queue(task);
            let key = BatchKey { array_id: task.array_id, resource_fingerprint: fingerprint, queue };
            batches.entry(key).or_default().push(task);
        }

        for (key, mut batch_tasks) in batches {
            if headroom <= 0 {
                break;
            }

            // An Array is exactly the set of sibling Tasks of one
            // TaskTemplateVersion within one Workflow (unique on
            // (workflow_id, task_template_version_id)), so its cap and the
            // per-TaskTemplate cap bound the same pool of Tasks here; both
            // counts are still consulted independently per spec §4.3 step 3
            // rather than assuming they coincide.
            let array = tasks::get_array(&self.pool, key.array_id).await.map_err(EngineError::Database)?;

            let array_headroom = match array.max_concurrently_running {
                Some(cap) => {
                    let running = tasks::count_running_for_array(&self.pool, key.array_id)
                        .await
                        .map_err(EngineError::Database)?;
                    cap as i64 - running
                }
                None => i64::MAX,
            };
            if array_headroom <= 0 {
                continue;
            }

            let template_headroom = match array.max_concurrently_running {
                Some(cap) => {
                    let running = tasks::count_running_for_template(
                        &self.pool,
                        self.workflow_id,
                        array.task_template_version_id,
                    )
                    .await
                    .map_err(EngineError::Database)?;
                    cap as i64 - running
                }
                None => i64::MAX,
            };

            let admit = headroom.min(array_headroom).min(template_headroom);
            if admit <= 0 {
                continue;
            }
            if (batch_tasks.len() as i64) > admit {
                batch_tasks.truncate(admit as usize);
            }
            headroom -= batch_tasks.len() as i64;
            self.issue_batch(&key, &batch_tasks).await?;
        }

        Ok(())
    }

    /// Create TaskInstances for a batch, submit it through the
    /// distributor adapter, and transition every Task `Q -> I` on success
    /// (or `-> F` if the scheduler rejects the submission outright).
    async fn issue_batch(&self, key: &BatchKey, batch_tasks: &[&TaskRow]) -> Result<(), EngineError> {
        let mut commands = Vec::with_capacity(batch_tasks.len());
        let mut task_instance_ids = Vec::with_capacity(batch_tasks.len());

        let mut tx = self.pool.begin().await.map_err(DbError::from).map_err(EngineError::Database)?;
        for task in batch_tasks {
            // `num_attempts` counts attempts taken, not just failures, so it
            // increments here at instance creation rather than only on
            // failure in the retry cascade.
            let updated_task = tasks::increment_num_attempts(&mut tx, task.id)
                .await
                .map_err(EngineError::Database)?;
            let ti = task_instances::create_task_instance(&mut tx, task.id, updated_task.num_attempts)
                .await
                .map_err(EngineError::Database)?;
            task_instance_ids.push(ti.id);
            commands.push(TaskCommand {
                task_instance_id: ti.id,
                command: task.command.clone(),
                resources: task.compute_resources.clone(),
            });
        }
        tx.commit().await.map_err(DbError::from).map_err(EngineError::Database)?;

        let submission = BatchSubmission { queue: key.queue.clone(), commands };

        match self.adapter.submit_batch(submission).await {
            Ok(batch_id) => {
                let mut tx = self.pool.begin().await.map_err(DbError::from).map_err(EngineError::Database)?;
                for task in batch_tasks {
                    transitions::transition_task(&mut tx, task.id, TaskStatus::Instantiating).await?;
                }
                for ti_id in &task_instance_ids {
                    task_instances::set_batch_id(&mut tx, *ti_id, &batch_id)
                        .await
                        .map_err(EngineError::Database)?;
                }
                tx.commit().await.map_err(DbError::from).map_err(EngineError::Database)?;
                info!(batch_id = %batch_id, count = batch_tasks.len(), "queued batch");
            }
            Err(err) => {
                warn!(error = %err, "batch submission rejected, marking tasks fatal");
                let mut tx = self.pool.begin().await.map_err(DbError::from).map_err(EngineError::Database)?;
                for task in batch_tasks {
                    transitions::transition_task(&mut tx, task.id, TaskStatus::Fatal).await?;
                }
                tx.commit().await.map_err(DbError::from).map_err(EngineError::Database)?;
            }
        }

        Ok(())
    }

    /// Poll outstanding TaskInstances and apply terminal transitions
    ///. Leaves `Running`/`Unknown` alone — those
    /// age out through the heartbeat lease and the Reaper if the
    /// scheduler never reports a terminal state.
    async fn observe_in_flight(&self, rows: &[TaskRow]) -> Result<(), EngineError> {
        for task in rows.iter().filter(|t| matches!(t.status.as_str(), "I" | "O" | "R")) {
            let instances = task_instances::list_for_task(&self.pool, task.id)
                .await
                .map_err(EngineError::Database)?;
            let Some(current) = instances.iter().max_by_key(|ti| ti.attempt) else { continue };
            let Some(distributor_id) = &current.distributor_id else { continue };

            match self.adapter.probe(distributor_id).await {
                Ok(ProbeStatus::Done) => {
                    transitions::transition_task_instance(
                        &self.pool,
                        current.id,
                        TaskInstanceStatus::Done,
                        None,
                        None,
                    )
                    .await?;
                }
                Ok(ProbeStatus::Failed(message)) => {
                    transitions::transition_task_instance(
                        &self.pool,
                        current.id,
                        TaskInstanceStatus::Error,
                        None,
                        Some(ErrorDetail { error_class: "other".into(), error_message: message }),
                    )
                    .await?;
                }
                Ok(ProbeStatus::Running) | Ok(ProbeStatus::Unknown) => {}
                Err(err) => warn!(error = %err, task_instance_id = current.id, "probe failed, leaving to reaper"),
            }
        }
        Ok(())
    }

    async fn refresh_heartbeat(&self) -> Result<(), EngineError> {
        let next_report_by = Utc::now()
            + chrono::Duration::from_std(self.config.heartbeat_interval).unwrap_or_default();
        workflow_runs::refresh_heartbeat(&self.pool, self.workflow_run_id, next_report_by)
            .await
            .map_err(EngineError::Database)?;
        Ok(())
    }
}

fn primary_queue(task: &TaskRow) -> String {
    task.fallback_queues
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("queue"))
        .and_then(|v| v.as_str())
        .unwrap_or("default")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn task_with_queues(fallback_queues: serde_json::Value) -> TaskRow {
        TaskRow {
            id: 1,
            workflow_id: 1,
            node_id: 1,
            array_id: 1,
            command: "echo hi".into(),
            max_attempts: 3,
            num_attempts: 0,
            status: "Q".into(),
            compute_resources: json!({}),
            resource_scaling: None,
            fallback_queues,
            status_date: Utc::now(),
        }
    }

    #[test]
    fn primary_queue_reads_first_fallback_entry() {
        let task = task_with_queues(json!([{ "queue": "all.q" }, { "queue": "overflow.q" }]));
        assert_eq!(primary_queue(&task), "all.q");
    }

    #[test]
    fn primary_queue_defaults_when_no_fallback_queues() {
        let task = task_with_queues(json!([]));
        assert_eq!(primary_queue(&task), "default");
    }
}
