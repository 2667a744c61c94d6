//! The Transition Service: the only code path allowed to
//! mutate `status` on Task, TaskInstance, or WorkflowRun. Every entry
//! point here opens its own transaction, locks the row(s) it touches,
//! validates the requested edge against the entity's closed transition
//! table, and cascades into the parent within the same transaction.

use db::{
    models::{TaskRow, WorkflowRunRow},
    repository::{dag, task_instances, tasks, workflow_runs, workflows},
    DbError, DbPool,
};
use serde_json::Value;

use crate::resource_adjustment::{self, Adjustment, FailureClass, QueueLimit, ScalingRule};
use crate::status::{roll_up_workflow_status, TaskInstanceStatus, TaskStatus, WorkflowStatus};
use crate::EngineError;

pub use db::models::WorkflowRunStatusCode;

/// Classification detail attached to a TaskInstance error transition.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub error_class: String,
    pub error_message: String,
}

// ---------------------------------------------------------------------------
// TaskInstance transitions
// ---------------------------------------------------------------------------

/// Transition a TaskInstance and cascade into its Task.
pub async fn transition_task_instance(
    pool: &DbPool,
    ti_id: i64,
    target: TaskInstanceStatus,
    node_name: Option<&str>,
    error: Option<ErrorDetail>,
) -> Result<db::models::TaskInstanceRow, EngineError> {
    let mut tx = pool.begin().await.map_err(DbError::from)?;

    let ti = task_instances::lock_task_instance_for_update(&mut tx, ti_id)
        .await
        .map_err(EngineError::Database)?;
    let current = status_char(&ti.status, "task_instance", ti_id, TaskInstanceStatus::from_char)?;

    if !current.can_transition_to(target) {
        return Err(EngineError::InvalidTransition {
            entity: "task_instance",
            id: ti_id,
            from: current.as_char(),
            to: target.as_char(),
        });
    }

    let mut updated = task_instances::set_status(&mut tx, ti_id, target.as_char())
        .await
        .map_err(EngineError::Database)?;

    if target == TaskInstanceStatus::Running {
        if let Some(name) = node_name {
            updated = task_instances::set_node_name(&mut tx, ti_id, name)
                .await
                .map_err(EngineError::Database)?;
        }
    }

    if let Some(detail) = &error {
        task_instances::insert_error_log(&mut tx, ti_id, &detail.error_class, &detail.error_message)
            .await
            .map_err(EngineError::Database)?;
    }

    match target {
        TaskInstanceStatus::Done => {
            transition_task(&mut tx, ti.task_id, TaskStatus::Done).await?;
        }
        TaskInstanceStatus::Error
        | TaskInstanceStatus::ResourceError
        | TaskInstanceStatus::NoHeartbeat
        | TaskInstanceStatus::UnknownError => {
            cascade_retriable_failure(&mut tx, ti.task_id, target, error.as_ref()).await?;
        }
        TaskInstanceStatus::Fatal => {
            transition_task(&mut tx, ti.task_id, TaskStatus::Fatal).await?;
        }
        _ => {}
    }

    tx.commit().await.map_err(DbError::from)?;
    Ok(updated)
}

/// Bulk-transition a set of TaskInstances within one transaction — used by the Coordinator's
/// `transition_to_launched` (`I → O`) and by cold-resume's `K → F` sweep.
pub async fn transition_array_batch(
    pool: &DbPool,
    ti_ids: &[i64],
    target: TaskInstanceStatus,
) -> Result<Vec<db::models::TaskInstanceRow>, EngineError> {
    let mut tx = pool.begin().await.map_err(DbError::from)?;
    let mut rows = Vec::with_capacity(ti_ids.len());

    for &id in ti_ids {
        let ti = task_instances::lock_task_instance_for_update(&mut tx, id)
            .await
            .map_err(EngineError::Database)?;
        let current = status_char(&ti.status, "task_instance", id, TaskInstanceStatus::from_char)?;

        if !current.can_transition_to(target) {
            return Err(EngineError::InvalidTransition {
                entity: "task_instance",
                id,
                from: current.as_char(),
                to: target.as_char(),
            });
        }

        let updated = task_instances::set_status(&mut tx, id, target.as_char())
            .await
            .map_err(EngineError::Database)?;

        if target == TaskInstanceStatus::Done {
            transition_task(&mut tx, ti.task_id, TaskStatus::Done).await?;
        } else if target == TaskInstanceStatus::Fatal {
            transition_task(&mut tx, ti.task_id, TaskStatus::Fatal).await?;
        }

        rows.push(updated);
    }

    tx.commit().await.map_err(DbError::from)?;
    Ok(rows)
}

async fn cascade_retriable_failure(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    task_id: i64,
    ti_target: TaskInstanceStatus,
    error: Option<&ErrorDetail>,
) -> Result<(), EngineError> {
    // `num_attempts` was already incremented when this attempt's
    // TaskInstance was created (issue_batch / queue_task_batch); a terminal
    // failure here only reads it to decide retry vs. fatal.
    let task = tasks::lock_task_for_update(tx, task_id)
        .await
        .map_err(EngineError::Database)?;

    if task.num_attempts >= task.max_attempts {
        transition_task(tx, task.id, TaskStatus::Fatal).await?;
        return Ok(());
    }

    if ti_target == TaskInstanceStatus::ResourceError {
        let failure_class = error
            .map(|d| classify_failure(&d.error_class))
            .unwrap_or(FailureClass::Other);
        let scaling_rule = task
            .resource_scaling
            .as_ref()
            .map(parse_scaling_rule)
            .unwrap_or_default();
        let fallback_queues: Vec<QueueLimit> = task
            .fallback_queues
            .as_array()
            .map(|arr| arr.iter().filter_map(QueueLimit::from_json).collect())
            .unwrap_or_default();

        let adjustment = resource_adjustment::next_resources(
            &task.compute_resources,
            failure_class,
            &scaling_rule,
            &fallback_queues,
            task.num_attempts as usize,
            None,
        );

        match adjustment {
            Adjustment::Retry { resources, .. } => {
                tasks::set_compute_resources(tx, task.id, resources)
                    .await
                    .map_err(EngineError::Database)?;
                transition_task(tx, task.id, TaskStatus::AdjustingResources).await?;
                transition_task(tx, task.id, TaskStatus::Queued).await?;
            }
            Adjustment::Exhausted => {
                transition_task(tx, task.id, TaskStatus::Fatal).await?;
            }
        }
    } else {
        transition_task(tx, task.id, TaskStatus::ErrorRecoverable).await?;
        transition_task(tx, task.id, TaskStatus::Queued).await?;
    }

    Ok(())
}

fn classify_failure(error_class: &str) -> FailureClass {
    match error_class {
        "memory_exceeded" => FailureClass::MemoryExceeded,
        "runtime_exceeded" => FailureClass::RuntimeExceeded,
        _ => FailureClass::Other,
    }
}

fn parse_scaling_rule(value: &Value) -> ScalingRule {
    if let Some(factor) = value.get("multiplier").and_then(Value::as_f64) {
        return ScalingRule::Multiplier(factor);
    }
    if let Some(seq) = value.get("sequence").and_then(Value::as_array) {
        return ScalingRule::Sequence(seq.clone());
    }
    ScalingRule::default()
}

// ---------------------------------------------------------------------------
// Task transitions
// ---------------------------------------------------------------------------

/// Transition a Task. When the target is `D`, the same transaction
/// activates any downstream Task whose upstream set is now wholly `D`
///.
pub async fn transition_task(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    task_id: i64,
    target: TaskStatus,
) -> Result<TaskRow, EngineError> {
    let task = tasks::lock_task_for_update(tx, task_id)
        .await
        .map_err(EngineError::Database)?;
    let updated = write_task_status(tx, task, target).await?;

    if target == TaskStatus::Done {
        activate_downstream(tx, &updated).await?;
    }

    Ok(updated)
}

async fn write_task_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    task: TaskRow,
    target: TaskStatus,
) -> Result<TaskRow, EngineError> {
    let current = status_char(&task.status, "task", task.id, TaskStatus::from_char)?;

    if !current.can_transition_to(target) {
        return Err(EngineError::InvalidTransition {
            entity: "task",
            id: task.id,
            from: current.as_char(),
            to: target.as_char(),
        });
    }

    tasks::set_status(tx, task.id, target.as_char())
        .await
        .map_err(EngineError::Database)
}

async fn activate_downstream(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    task: &TaskRow,
) -> Result<(), EngineError> {
    let dag_id = workflows::dag_id_for_workflow(tx, task.workflow_id)
        .await
        .map_err(EngineError::Database)?;
    let edge = dag::get_edge(tx, dag_id, task.node_id)
        .await
        .map_err(EngineError::Database)?;
    let downstream_ids: Vec<i64> = serde_json::from_value(edge.downstream_node_ids.clone()).unwrap_or_default();

    for node_id in downstream_ids {
        let candidate = tasks::get_task_by_node(tx, task.workflow_id, node_id)
            .await
            .map_err(EngineError::Database)?;
        if candidate.status != "G" {
            continue;
        }

        let candidate_edge = dag::get_edge(tx, dag_id, node_id)
            .await
            .map_err(EngineError::Database)?;
        let upstream_ids: Vec<i64> =
            serde_json::from_value(candidate_edge.upstream_node_ids.clone()).unwrap_or_default();

        let mut all_done = true;
        for up_node_id in &upstream_ids {
            let up_task = tasks::get_task_by_node(tx, task.workflow_id, *up_node_id)
                .await
                .map_err(EngineError::Database)?;
            if up_task.status != "D" {
                all_done = false;
                break;
            }
        }

        if all_done {
            write_task_status(tx, candidate, TaskStatus::Queued).await?;
        }
    }

    Ok(())
}

/// Administrative override: write a Task's status directly, bypassing
/// `legal_edges` and the downstream-activation cascade. Used by the
/// `update_task_status` admin endpoint and by the Reaper sweep that forces
/// orphaned non-terminal Tasks (no current WorkflowRun left to progress
/// them) to a terminal status.
pub async fn override_task_status(
    pool: &DbPool,
    task_id: i64,
    target: TaskStatus,
) -> Result<TaskRow, EngineError> {
    let mut tx = pool.begin().await.map_err(DbError::from)?;
    let updated = tasks::set_status(&mut tx, task_id, target.as_char())
        .await
        .map_err(EngineError::Database)?;
    tx.commit().await.map_err(DbError::from)?;
    Ok(updated)
}

/// Cold-resume kill: force a non-terminal TaskInstance to `F` without the
/// ordinary terminal cascade, then reset its Task to `Q` for a fresh
/// attempt. The
/// ordinary `transition_task_instance` cascade would instead fatal the
/// Task, which is correct for a real execution failure but wrong for a
/// kill that exists only to free the Task for retry.
pub async fn cold_resume_kill(pool: &DbPool, ti_id: i64) -> Result<TaskRow, EngineError> {
    let mut tx = pool.begin().await.map_err(DbError::from)?;

    let ti = task_instances::lock_task_instance_for_update(&mut tx, ti_id)
        .await
        .map_err(EngineError::Database)?;
    task_instances::set_status(&mut tx, ti_id, TaskInstanceStatus::Fatal.as_char())
        .await
        .map_err(EngineError::Database)?;

    let task = tasks::lock_task_for_update(&mut tx, ti.task_id)
        .await
        .map_err(EngineError::Database)?;
    let updated = if task.status == "D" || task.status == "F" {
        task
    } else {
        tasks::set_status(&mut tx, task.id, TaskStatus::Queued.as_char())
            .await
            .map_err(EngineError::Database)?
    };

    tx.commit().await.map_err(DbError::from)?;
    Ok(updated)
}

// ---------------------------------------------------------------------------
// WorkflowRun transitions
// ---------------------------------------------------------------------------

fn legal_workflow_run_transition(current: WorkflowRunStatusCode, target: WorkflowRunStatusCode) -> bool {
    use WorkflowRunStatusCode::*;
    matches!(
        (current, target),
        (Registering, Bound)
            | (Registering, Halted)
            | (Registering, ColdResume)
            | (Registering, Failed)
            | (Bound, Done)
            | (Bound, Failed)
            | (Bound, Halted)
            | (Bound, ColdResume)
    )
}

pub async fn transition_workflow_run(
    pool: &DbPool,
    wfr_id: i64,
    target: WorkflowRunStatusCode,
) -> Result<WorkflowRunRow, EngineError> {
    let row = workflow_runs::get_workflow_run(pool, wfr_id)
        .await
        .map_err(EngineError::Database)?;
    let current = row
        .status
        .chars()
        .next()
        .and_then(WorkflowRunStatusCode::from_char)
        .ok_or_else(|| EngineError::Validation(format!("unknown workflow_run status '{}'", row.status)))?;

    if !legal_workflow_run_transition(current, target) {
        return Err(EngineError::InvalidTransition {
            entity: "workflow_run",
            id: wfr_id,
            from: current.as_char(),
            to: target.as_char(),
        });
    }

    workflow_runs::update_status(pool, wfr_id, target.as_char())
        .await
        .map_err(EngineError::Database)
}

// ---------------------------------------------------------------------------
// Workflow roll-up.
// ---------------------------------------------------------------------------

pub async fn workflow_status(pool: &DbPool, workflow_id: i64) -> Result<WorkflowStatus, EngineError> {
    let rows = tasks::list_tasks_for_workflow(pool, workflow_id)
        .await
        .map_err(EngineError::Database)?;
    let statuses: Vec<TaskStatus> = rows
        .iter()
        .filter_map(|t| t.status.chars().next().and_then(TaskStatus::from_char))
        .collect();
    Ok(roll_up_workflow_status(&statuses))
}

fn status_char<T>(
    raw: &str,
    entity: &'static str,
    id: i64,
    parse: impl Fn(char) -> Option<T>,
) -> Result<T, EngineError> {
    raw.chars()
        .next()
        .and_then(parse)
        .ok_or_else(|| EngineError::Validation(format!("unknown {entity} {id} status '{raw}'")))
}
