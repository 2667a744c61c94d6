//! Client/GUI/CLI-facing endpoints: bind, resume, concurrency
//! caps, the incremental status diff, and the TaskTemplate-granularity DAG
//! roll-up for the GUI.

use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use db::{
    models::{TaskInstanceRow, TaskRow},
    repository::{
        dag::{self, EdgeSpec},
        task_instances, task_templates, tasks, tools, workflow_runs, workflows,
    },
};
use engine::{
    models::{DagDefinition, EdgeDefinition},
    status::TaskStatus,
    transitions::{self, WorkflowRunStatusCode},
    validate_dag,
};

use crate::{auth::{require_owner, AuthContext}, error::ApiError, AppState};

// ---------------------------------------------------------------------------
// POST /workflow — bind
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BindTaskSpec {
    /// Caller-local identifier used to express edges in this request; has no
    /// relation to the Node id the Entity Store eventually assigns.
    pub local_id: String,
    pub task_template_name: String,
    pub command_template: String,
    pub arg_names: Value,
    pub node_args: Value,
    pub command: String,
    pub max_attempts: i32,
    pub compute_resources: Value,
    pub resource_scaling: Option<Value>,
    pub fallback_queues: Value,
    #[serde(default)]
    pub upstream_local_ids: Vec<String>,
    #[serde(default)]
    pub array_max_concurrently_running: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct BindWorkflowRequest {
    pub tool_name: String,
    pub tool_version: String,
    pub tasks: Vec<BindTaskSpec>,
    #[serde(default)]
    pub workflow_args: Value,
    #[serde(default)]
    pub workflow_attrs: Value,
    pub max_concurrently_running: i32,
}

#[derive(Debug, Serialize)]
pub struct BindWorkflowResponse {
    pub workflow_id: i64,
    /// `false` means this hash already had a Workflow — the caller should
    /// check `is_resumable` before opening a new WorkflowRun.
    pub newly_created: bool,
}

pub async fn bind_workflow(
    State(state): State<AppState>,
    Json(req): Json<BindWorkflowRequest>,
) -> Result<Json<BindWorkflowResponse>, ApiError> {
    if req.tasks.is_empty() {
        return bind_empty_workflow(&state, &req).await;
    }

    let (tool, _) = tools::get_or_create_tool(&state.pool, &req.tool_name).await?;
    let (tool_version, _) = tools::get_or_create_tool_version(&state.pool, tool.id, &req.tool_version).await?;

    let mut node_ids: HashMap<String, i64> = HashMap::with_capacity(req.tasks.len());
    let mut ttv_ids: HashMap<String, i64> = HashMap::with_capacity(req.tasks.len());

    for spec in &req.tasks {
        let (template, _) =
            task_templates::get_or_create_task_template(&state.pool, tool_version.id, &spec.task_template_name).await?;
        let (ttv, _) = task_templates::get_or_create_task_template_version(
            &state.pool,
            template.id,
            &spec.command_template,
            spec.arg_names.clone(),
        )
        .await?;
        let (node, _) = dag::get_or_create_node(&state.pool, ttv.id, spec.node_args.clone()).await?;

        if node_ids.insert(spec.local_id.clone(), node.id).is_some() {
            return Err(ApiError::BadRequest(format!("duplicate local_id '{}'", spec.local_id)));
        }
        ttv_ids.insert(spec.local_id.clone(), ttv.id);
    }

    let dag_definition = DagDefinition {
        nodes: req.tasks.iter().map(|t| t.local_id.clone()).collect(),
        edges: req
            .tasks
            .iter()
            .flat_map(|t| {
                t.upstream_local_ids
                    .iter()
                    .map(move |u| EdgeDefinition { from: u.clone(), to: t.local_id.clone() })
            })
            .collect(),
    };
    validate_dag(&dag_definition)?;

    let mut downstream: HashMap<String, Vec<String>> = HashMap::new();
    for spec in &req.tasks {
        for upstream in &spec.upstream_local_ids {
            downstream.entry(upstream.clone()).or_default().push(spec.local_id.clone());
        }
    }

    let edge_specs: Vec<EdgeSpec> = req
        .tasks
        .iter()
        .map(|spec| EdgeSpec {
            node_id: node_ids[&spec.local_id],
            upstream_node_ids: spec.upstream_local_ids.iter().map(|id| node_ids[id]).collect(),
            downstream_node_ids: downstream
                .get(&spec.local_id)
                .into_iter()
                .flatten()
                .map(|id| node_ids[id])
                .collect(),
        })
        .collect();

    let (dag_row, _) = dag::get_or_create_dag(&state.pool, &edge_specs).await?;
    dag::insert_edges_bulk(&state.pool, dag_row.id, &edge_specs).await?;

    let (workflow, created) = workflows::get_or_create_workflow(
        &state.pool,
        tool.id,
        dag_row.id,
        req.workflow_args.clone(),
        req.workflow_attrs.clone(),
        req.max_concurrently_running,
    )
    .await?;

    if created {
        let mut array_ids: HashMap<i64, i64> = HashMap::new(); // ttv_id -> array_id
        let mut specs = Vec::with_capacity(req.tasks.len());

        for spec in &req.tasks {
            let ttv_id = ttv_ids[&spec.local_id];
            let array_id = match array_ids.get(&ttv_id) {
                Some(&id) => id,
                None => {
                    let (array, _) = tasks::get_or_create_array(
                        &state.pool,
                        workflow.id,
                        ttv_id,
                        spec.array_max_concurrently_running,
                    )
                    .await?;
                    array_ids.insert(ttv_id, array.id);
                    array.id
                }
            };

            specs.push(tasks::TaskSpec {
                node_id: node_ids[&spec.local_id],
                array_id,
                command: spec.command.clone(),
                max_attempts: spec.max_attempts,
                compute_resources: spec.compute_resources.clone(),
                resource_scaling: spec.resource_scaling.clone(),
                fallback_queues: spec.fallback_queues.clone(),
            });
        }

        tasks::bulk_insert_tasks(&state.pool, workflow.id, &specs).await?;
    }

    Ok(Json(BindWorkflowResponse { workflow_id: workflow.id, newly_created: created }))
}

/// An empty DAG binds to an immediately-DONE Workflow with zero Tasks
/// — there is nothing to hash-dedupe beyond
/// the Tool and an empty DAG.
async fn bind_empty_workflow(
    state: &AppState,
    req: &BindWorkflowRequest,
) -> Result<Json<BindWorkflowResponse>, ApiError> {
    let (tool, _) = tools::get_or_create_tool(&state.pool, &req.tool_name).await?;
    let (dag_row, _) = dag::get_or_create_dag(&state.pool, &[]).await?;
    let (workflow, created) = workflows::get_or_create_workflow(
        &state.pool,
        tool.id,
        dag_row.id,
        req.workflow_args.clone(),
        req.workflow_attrs.clone(),
        req.max_concurrently_running,
    )
    .await?;
    Ok(Json(BindWorkflowResponse { workflow_id: workflow.id, newly_created: created }))
}

// ---------------------------------------------------------------------------
// POST /workflow/{id}/set_resume
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    Hot,
    Cold,
}

#[derive(Debug, Deserialize)]
pub struct SetResumeRequest {
    pub jobmon_version: String,
    pub mode: ResumeMode,
}

#[derive(Debug, Serialize)]
pub struct WorkflowRunDto {
    pub id: i64,
    pub workflow_id: i64,
    pub status: String,
    pub next_report_by: DateTime<Utc>,
}

pub async fn set_resume(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    auth: AuthContext,
    Json(req): Json<SetResumeRequest>,
) -> Result<Json<WorkflowRunDto>, ApiError> {
    if let Some(current) = workflow_runs::get_current_workflow_run(&state.pool, workflow_id).await? {
        require_owner(&auth.user, &current.user)?;

        let target = match req.mode {
            ResumeMode::Hot => WorkflowRunStatusCode::Halted,
            ResumeMode::Cold => WorkflowRunStatusCode::ColdResume,
        };
        transitions::transition_workflow_run(&state.pool, current.id, target).await?;

        if matches!(req.mode, ResumeMode::Cold) {
            let instances = task_instances::list_non_terminal_for_workflow(&state.pool, workflow_id).await?;
            for ti in instances {
                transitions::cold_resume_kill(&state.pool, ti.id).await?;
            }
        }
    }

    let next_report_by = Utc::now() + chrono::Duration::seconds(state.config.heartbeat_interval_secs as i64);
    let run = workflow_runs::create_workflow_run(&state.pool, workflow_id, &auth.user, &req.jobmon_version, next_report_by)
        .await?;

    Ok(Json(WorkflowRunDto {
        id: run.id,
        workflow_id: run.workflow_id,
        status: run.status,
        next_report_by: run.next_report_by,
    }))
}

// ---------------------------------------------------------------------------
// GET /workflow/{id}/is_resumable
// ---------------------------------------------------------------------------

pub async fn is_resumable(State(state): State<AppState>, Path(workflow_id): Path<i64>) -> Result<Json<bool>, ApiError> {
    workflows::get_workflow(&state.pool, workflow_id).await?;
    let current = workflow_runs::get_current_workflow_run(&state.pool, workflow_id).await?;
    Ok(Json(current.is_none()))
}

// ---------------------------------------------------------------------------
// Concurrency caps
// ---------------------------------------------------------------------------

pub async fn get_max_concurrently_running(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
) -> Result<Json<i32>, ApiError> {
    let workflow = workflows::get_workflow(&state.pool, workflow_id).await?;
    Ok(Json(workflow.max_concurrently_running))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMaxConcurrentlyRunningRequest {
    pub max_concurrently_running: i32,
}

pub async fn update_max_concurrently_running(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    auth: AuthContext,
    Json(req): Json<UpdateMaxConcurrentlyRunningRequest>,
) -> Result<Json<i32>, ApiError> {
    let current = workflow_runs::get_current_workflow_run(&state.pool, workflow_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("workflow has no current run".into()))?;
    require_owner(&auth.user, &current.user)?;

    let updated =
        workflows::update_max_concurrently_running(&state.pool, workflow_id, req.max_concurrently_running).await?;
    Ok(Json(updated.max_concurrently_running))
}

#[derive(Debug, Deserialize)]
pub struct UpdateArrayMaxConcurrentlyRunningRequest {
    pub max_concurrently_running: Option<i32>,
}

pub async fn update_array_max_concurrently_running(
    State(state): State<AppState>,
    Path(array_id): Path<i64>,
    auth: AuthContext,
    Json(req): Json<UpdateArrayMaxConcurrentlyRunningRequest>,
) -> Result<Json<Option<i32>>, ApiError> {
    let array = tasks::get_array(&state.pool, array_id).await?;
    let current = workflow_runs::get_current_workflow_run(&state.pool, array.workflow_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("workflow has no current run".into()))?;
    require_owner(&auth.user, &current.user)?;

    let updated =
        tasks::update_array_max_concurrently_running(&state.pool, array_id, req.max_concurrently_running).await?;
    Ok(Json(updated.max_concurrently_running))
}

// ---------------------------------------------------------------------------
// GET /workflow/{id}/status, GET /workflow/{id}/tasks
// ---------------------------------------------------------------------------

pub async fn workflow_status(State(state): State<AppState>, Path(workflow_id): Path<i64>) -> Result<Json<String>, ApiError> {
    let status = transitions::workflow_status(&state.pool, workflow_id).await?;
    Ok(Json(status.to_string()))
}

pub async fn workflow_tasks(State(state): State<AppState>, Path(workflow_id): Path<i64>) -> Result<Json<Vec<TaskRow>>, ApiError> {
    let rows = tasks::list_tasks_for_workflow(&state.pool, workflow_id).await?;
    Ok(Json(rows))
}

// ---------------------------------------------------------------------------
// POST /workflow/{id}/task_status_updates
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TaskStatusUpdatesRequest {
    pub last_sync_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusUpdatesResponse {
    pub server_time: DateTime<Utc>,
    pub tasks: Vec<TaskRow>,
}

pub async fn task_status_updates(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    Json(req): Json<TaskStatusUpdatesRequest>,
) -> Result<Json<TaskStatusUpdatesResponse>, ApiError> {
    let server_time = db::server_now(&state.pool).await?;
    let tasks = tasks::list_tasks_changed_since(&state.pool, workflow_id, req.last_sync_time).await?;
    Ok(Json(TaskStatusUpdatesResponse { server_time, tasks }))
}

// ---------------------------------------------------------------------------
// GET /workflow/{id}/task_template_dag
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TaskTemplateDagNode {
    pub task_template_id: i64,
    pub task_template_name: String,
    pub upstream_task_template_ids: Vec<i64>,
    pub downstream_task_template_ids: Vec<i64>,
}

pub async fn task_template_dag(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
) -> Result<Json<Vec<TaskTemplateDagNode>>, ApiError> {
    let workflow = workflows::get_workflow(&state.pool, workflow_id).await?;
    let rows = dag::list_template_dag(&state.pool, workflow.dag_id).await?;

    let node_to_template: HashMap<i64, i64> = rows.iter().map(|r| (r.node_id, r.task_template_id)).collect();
    let mut by_template: HashMap<i64, (String, HashSet<i64>, HashSet<i64>)> = HashMap::new();

    for row in &rows {
        let entry = by_template
            .entry(row.task_template_id)
            .or_insert_with(|| (row.task_template_name.clone(), HashSet::new(), HashSet::new()));

        let upstream_nodes: Vec<i64> = serde_json::from_value(row.upstream_node_ids.clone()).unwrap_or_default();
        let downstream_nodes: Vec<i64> = serde_json::from_value(row.downstream_node_ids.clone()).unwrap_or_default();

        for node_id in upstream_nodes {
            if let Some(&template_id) = node_to_template.get(&node_id) {
                if template_id != row.task_template_id {
                    entry.1.insert(template_id);
                }
            }
        }
        for node_id in downstream_nodes {
            if let Some(&template_id) = node_to_template.get(&node_id) {
                if template_id != row.task_template_id {
                    entry.2.insert(template_id);
                }
            }
        }
    }

    let result = by_template
        .into_iter()
        .map(|(task_template_id, (task_template_name, upstream, downstream))| TaskTemplateDagNode {
            task_template_id,
            task_template_name,
            upstream_task_template_ids: upstream.into_iter().collect(),
            downstream_task_template_ids: downstream.into_iter().collect(),
        })
        .collect();

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// PUT /task/{id}/status — administrative override
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UpdateTaskStatusRequest {
    pub status: char,
}

pub async fn update_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    auth: AuthContext,
    Json(req): Json<UpdateTaskStatusRequest>,
) -> Result<Json<TaskRow>, ApiError> {
    let task = tasks::get_task(&state.pool, task_id).await?;
    if let Some(current) = workflow_runs::get_current_workflow_run(&state.pool, task.workflow_id).await? {
        require_owner(&auth.user, &current.user)?;
    }

    let target = TaskStatus::from_char(req.status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown task status '{}'", req.status)))?;
    let updated = transitions::override_task_status(&state.pool, task_id, target).await?;
    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// GET /task/{id} — single-task lookup (CLI `task_status`)
// ---------------------------------------------------------------------------

pub async fn get_task(State(state): State<AppState>, Path(task_id): Path<i64>) -> Result<Json<TaskRow>, ApiError> {
    let task = tasks::get_task(&state.pool, task_id).await?;
    Ok(Json(task))
}

// ---------------------------------------------------------------------------
// GET /task/{id}/filepaths — stdout/stderr paths per attempt (CLI
// `get_filepaths`)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TaskInstanceFilepaths {
    pub task_instance_id: i64,
    pub attempt: i32,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
}

pub async fn task_filepaths(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<Vec<TaskInstanceFilepaths>>, ApiError> {
    tasks::get_task(&state.pool, task_id).await?;
    let instances = task_instances::list_for_task(&state.pool, task_id).await?;
    let paths = instances
        .into_iter()
        .map(|ti| TaskInstanceFilepaths {
            task_instance_id: ti.id,
            attempt: ti.attempt,
            stdout_path: ti.stdout_path,
            stderr_path: ti.stderr_path,
        })
        .collect();
    Ok(Json(paths))
}

// ---------------------------------------------------------------------------
// POST /workflow/{id}/reset — admin reset (CLI `workflow_reset`)
// ---------------------------------------------------------------------------

/// Force every non-DONE Task of a Workflow back to `G` (registering) via
/// the administrative override path. Intended for
/// an operator restarting a workflow from scratch without a fresh bind —
/// unlike cold resume, it does not require (or touch) a current
/// WorkflowRun, so it is only safe to call when none is current.
pub async fn reset_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    auth: AuthContext,
) -> Result<Json<Vec<TaskRow>>, ApiError> {
    workflows::get_workflow(&state.pool, workflow_id).await?;

    if workflow_runs::get_current_workflow_run(&state.pool, workflow_id).await?.is_some() {
        return Err(ApiError::BadRequest(
            "workflow has a current run; halt or resume it before resetting".into(),
        ));
    }

    if let Some(latest) = workflow_runs::get_latest_workflow_run(&state.pool, workflow_id).await? {
        require_owner(&auth.user, &latest.user)?;
    }

    let tasks = tasks::list_tasks_for_workflow(&state.pool, workflow_id).await?;
    let mut reset = Vec::with_capacity(tasks.len());
    for task in tasks {
        if task.status == "D" {
            reset.push(task);
            continue;
        }
        reset.push(transitions::override_task_status(&state.pool, task.id, TaskStatus::Registering).await?);
    }
    Ok(Json(reset))
}
