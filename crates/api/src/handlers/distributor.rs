//! Coordinator endpoints the Distributor process calls. The
//! Distributor is stateless between calls; every handler here re-validates
//! that the caller's WorkflowRun still holds the current lease before
//! mutating anything, returning `WorkflowRunNotCurrent` for a superseded
//! caller.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use db::{
    models::TaskInstanceRow,
    repository::{task_instances, tasks, workflow_runs},
    DbError, DbPool,
};
use engine::{
    status::{TaskInstanceStatus, TaskStatus},
    transitions::{self, ErrorDetail},
    EngineError,
};

use crate::{error::ApiError, AppState};

async fn ensure_current(pool: &DbPool, workflow_id: i64, workflow_run_id: i64) -> Result<(), ApiError> {
    match workflow_runs::get_current_workflow_run(pool, workflow_id).await? {
        Some(run) if run.id == workflow_run_id => Ok(()),
        _ => Err(EngineError::WorkflowRunNotCurrent(workflow_run_id).into()),
    }
}

async fn workflow_id_for_task_instance(pool: &DbPool, ti_id: i64) -> Result<i64, ApiError> {
    let ti = task_instances::get_task_instance(pool, ti_id).await?;
    let task = tasks::get_task(pool, ti.task_id).await?;
    Ok(task.workflow_id)
}

// ---------------------------------------------------------------------------
// POST /array/{id}/queue_task_batch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueueTaskBatchRequest {
    pub workflow_run_id: i64,
    /// Caller-chosen idempotency key for this batch. A retried call with
    /// the same (array id, batch key) replays the first call's result
    /// instead of creating a second set of TaskInstances — the Distributor
    /// is stateless between calls and may retry at-least-once.
    pub batch_key: String,
    pub task_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct QueuedTaskInstance {
    pub task_instance_id: i64,
    pub task_id: i64,
    pub command: String,
    pub resources: Value,
}

#[derive(Debug, Serialize)]
pub struct QueueTaskBatchResponse {
    pub task_instances: Vec<QueuedTaskInstance>,
}

pub async fn queue_task_batch(
    State(state): State<AppState>,
    Path(array_id): Path<i64>,
    Json(req): Json<QueueTaskBatchRequest>,
) -> Result<Json<QueueTaskBatchResponse>, ApiError> {
    let array = tasks::get_array(&state.pool, array_id).await?;
    ensure_current(&state.pool, array.workflow_id, req.workflow_run_id).await?;

    let mut tx = state.pool.begin().await.map_err(DbError::from)?;
    let claimed = tasks::claim_batch_request(&mut tx, array_id, &req.batch_key).await?;
    tx.commit().await.map_err(DbError::from)?;

    if !claimed {
        // Someone already served (or is serving) this batch key; replay its
        // TaskInstances rather than creating a duplicate set.
        let existing_ids = tasks::get_batch_request(&state.pool, array_id, &req.batch_key)
            .await?
            .unwrap_or_default();
        let mut task_instances = Vec::with_capacity(existing_ids.len());
        for ti_id in existing_ids {
            let ti = task_instances::get_task_instance(&state.pool, ti_id).await?;
            let task = tasks::get_task(&state.pool, ti.task_id).await?;
            task_instances.push(QueuedTaskInstance {
                task_instance_id: ti.id,
                task_id: task.id,
                command: task.command,
                resources: task.compute_resources,
            });
        }
        return Ok(Json(QueueTaskBatchResponse { task_instances }));
    }

    let mut loaded = Vec::with_capacity(req.task_ids.len());
    for task_id in &req.task_ids {
        let task = tasks::get_task(&state.pool, *task_id).await?;
        if task.array_id != array_id {
            return Err(ApiError::BadRequest(format!("task {task_id} does not belong to array {array_id}")));
        }
        loaded.push(task);
    }

    let mut created = Vec::with_capacity(loaded.len());
    let mut tx = state.pool.begin().await.map_err(DbError::from)?;
    for task in &loaded {
        // Counts attempts taken, not just failures — incremented here at
        // instance creation rather than only on failure in the retry cascade.
        let updated_task = tasks::increment_num_attempts(&mut tx, task.id).await?;
        let ti = task_instances::create_task_instance(&mut tx, task.id, updated_task.num_attempts).await?;
        created.push(ti.id);
    }
    tasks::finalize_batch_request(&mut tx, array_id, &req.batch_key, &created).await?;
    tx.commit().await.map_err(DbError::from)?;

    // Stamp the batch forward to `I` (instantiated) so the wire contract
    // reports instances in the state the Coordinator promises.
    transitions::transition_array_batch(&state.pool, &created, TaskInstanceStatus::Instantiated).await?;

    let mut tx = state.pool.begin().await.map_err(DbError::from)?;
    for task in &loaded {
        transitions::transition_task(&mut tx, task.id, TaskStatus::Instantiating).await?;
    }
    tx.commit().await.map_err(DbError::from)?;

    let task_instances = created
        .into_iter()
        .zip(loaded.into_iter())
        .map(|(ti_id, task)| QueuedTaskInstance {
            task_instance_id: ti_id,
            task_id: task.id,
            command: task.command,
            resources: task.compute_resources,
        })
        .collect();

    Ok(Json(QueueTaskBatchResponse { task_instances }))
}

// ---------------------------------------------------------------------------
// POST /array/{id}/transition_to_launched
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TransitionToLaunchedRequest {
    pub workflow_run_id: i64,
    pub task_instance_ids: Vec<i64>,
    pub distributor_batch_id: String,
}

pub async fn transition_to_launched(
    State(state): State<AppState>,
    Path(array_id): Path<i64>,
    Json(req): Json<TransitionToLaunchedRequest>,
) -> Result<Json<Vec<TaskInstanceRow>>, ApiError> {
    let array = tasks::get_array(&state.pool, array_id).await?;
    ensure_current(&state.pool, array.workflow_id, req.workflow_run_id).await?;

    let updated =
        transitions::transition_array_batch(&state.pool, &req.task_instance_ids, TaskInstanceStatus::Launched).await?;

    let mut tx = state.pool.begin().await.map_err(DbError::from)?;
    for ti in &updated {
        task_instances::set_batch_id(&mut tx, ti.id, &req.distributor_batch_id).await?;
        transitions::transition_task(&mut tx, ti.task_id, TaskStatus::Launched).await?;
    }
    tx.commit().await.map_err(DbError::from)?;

    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// POST /task_instance/{id}/log_distributor_id
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LogDistributorIdRequest {
    pub workflow_run_id: i64,
    pub distributor_id: String,
}

pub async fn log_distributor_id(
    State(state): State<AppState>,
    Path(ti_id): Path<i64>,
    Json(req): Json<LogDistributorIdRequest>,
) -> Result<Json<TaskInstanceRow>, ApiError> {
    let workflow_id = workflow_id_for_task_instance(&state.pool, ti_id).await?;
    ensure_current(&state.pool, workflow_id, req.workflow_run_id).await?;
    let updated = task_instances::set_distributor_id(&state.pool, ti_id, &req.distributor_id).await?;
    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// POST /task_instance/{id}/log_running
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LogRunningRequest {
    pub workflow_run_id: i64,
    pub node_name: String,
}

pub async fn log_running(
    State(state): State<AppState>,
    Path(ti_id): Path<i64>,
    Json(req): Json<LogRunningRequest>,
) -> Result<Json<TaskInstanceRow>, ApiError> {
    let workflow_id = workflow_id_for_task_instance(&state.pool, ti_id).await?;
    ensure_current(&state.pool, workflow_id, req.workflow_run_id).await?;

    let updated = transitions::transition_task_instance(
        &state.pool,
        ti_id,
        TaskInstanceStatus::Running,
        Some(&req.node_name),
        None,
    )
    .await?;

    let mut tx = state.pool.begin().await.map_err(DbError::from)?;
    transitions::transition_task(&mut tx, updated.task_id, TaskStatus::Running).await?;
    tx.commit().await.map_err(DbError::from)?;

    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// POST /task_instance/{id}/log_done|log_error|log_resource_error|log_no_heartbeat
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LogDoneRequest {
    pub workflow_run_id: i64,
}

pub async fn log_done(
    State(state): State<AppState>,
    Path(ti_id): Path<i64>,
    Json(req): Json<LogDoneRequest>,
) -> Result<Json<TaskInstanceRow>, ApiError> {
    let workflow_id = workflow_id_for_task_instance(&state.pool, ti_id).await?;
    ensure_current(&state.pool, workflow_id, req.workflow_run_id).await?;
    let updated = transitions::transition_task_instance(&state.pool, ti_id, TaskInstanceStatus::Done, None, None).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct LogFailureRequest {
    pub workflow_run_id: i64,
    pub error_class: String,
    pub error_message: String,
}

async fn log_failure(
    state: &AppState,
    ti_id: i64,
    req: LogFailureRequest,
    target: TaskInstanceStatus,
) -> Result<TaskInstanceRow, ApiError> {
    let workflow_id = workflow_id_for_task_instance(&state.pool, ti_id).await?;
    ensure_current(&state.pool, workflow_id, req.workflow_run_id).await?;
    let detail = ErrorDetail { error_class: req.error_class, error_message: req.error_message };
    let updated = transitions::transition_task_instance(&state.pool, ti_id, target, None, Some(detail)).await?;
    Ok(updated)
}

pub async fn log_error(
    State(state): State<AppState>,
    Path(ti_id): Path<i64>,
    Json(req): Json<LogFailureRequest>,
) -> Result<Json<TaskInstanceRow>, ApiError> {
    Ok(Json(log_failure(&state, ti_id, req, TaskInstanceStatus::Error).await?))
}

pub async fn log_resource_error(
    State(state): State<AppState>,
    Path(ti_id): Path<i64>,
    Json(req): Json<LogFailureRequest>,
) -> Result<Json<TaskInstanceRow>, ApiError> {
    Ok(Json(log_failure(&state, ti_id, req, TaskInstanceStatus::ResourceError).await?))
}

pub async fn log_no_heartbeat(
    State(state): State<AppState>,
    Path(ti_id): Path<i64>,
    Json(req): Json<LogFailureRequest>,
) -> Result<Json<TaskInstanceRow>, ApiError> {
    Ok(Json(log_failure(&state, ti_id, req, TaskInstanceStatus::NoHeartbeat).await?))
}

// ---------------------------------------------------------------------------
// POST /task_instance/{id}/heartbeat
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub workflow_run_id: i64,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(ti_id): Path<i64>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<TaskInstanceRow>, ApiError> {
    let workflow_id = workflow_id_for_task_instance(&state.pool, ti_id).await?;
    ensure_current(&state.pool, workflow_id, req.workflow_run_id).await?;

    let next_report_by = Utc::now() + chrono::Duration::seconds(state.config.heartbeat_interval_secs as i64);
    let updated = task_instances::refresh_heartbeat(&state.pool, ti_id, next_report_by).await?;
    Ok(Json(updated))
}
