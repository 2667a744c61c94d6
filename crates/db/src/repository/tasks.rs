//! Array and Task persistence.

use sqlx::{PgPool, Postgres, Transaction};

use crate::{models::{ArrayRow, TaskRow}, DbError};

use super::dag::CHUNK_SIZE;

pub async fn get_or_create_array(
    pool: &PgPool,
    workflow_id: i64,
    task_template_version_id: i64,
    max_concurrently_running: Option<i32>,
) -> Result<(ArrayRow, bool), DbError> {
    if let Some(row) = sqlx::query_as::<_, ArrayRow>(
        "SELECT id, workflow_id, task_template_version_id, max_concurrently_running, created_at FROM arrays WHERE workflow_id = $1 AND task_template_version_id = $2",
    )
    .bind(workflow_id)
    .bind(task_template_version_id)
    .fetch_optional(pool)
    .await?
    {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, ArrayRow>(
        r#"
        INSERT INTO arrays (workflow_id, task_template_version_id, max_concurrently_running)
        VALUES ($1, $2, $3)
        ON CONFLICT (workflow_id, task_template_version_id) DO NOTHING
        RETURNING id, workflow_id, task_template_version_id, max_concurrently_running, created_at
        "#,
    )
    .bind(workflow_id)
    .bind(task_template_version_id)
    .bind(max_concurrently_running)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        None => {
            let row = sqlx::query_as::<_, ArrayRow>(
                "SELECT id, workflow_id, task_template_version_id, max_concurrently_running, created_at FROM arrays WHERE workflow_id = $1 AND task_template_version_id = $2",
            )
            .bind(workflow_id)
            .bind(task_template_version_id)
            .fetch_one(pool)
            .await?;
            Ok((row, false))
        }
    }
}

pub async fn get_array(pool: &PgPool, id: i64) -> Result<ArrayRow, DbError> {
    sqlx::query_as::<_, ArrayRow>(
        "SELECT id, workflow_id, task_template_version_id, max_concurrently_running, created_at FROM arrays WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn update_array_max_concurrently_running(
    pool: &PgPool,
    id: i64,
    max_concurrently_running: Option<i32>,
) -> Result<ArrayRow, DbError> {
    sqlx::query_as::<_, ArrayRow>(
        r#"
        UPDATE arrays SET max_concurrently_running = $1
        WHERE id = $2
        RETURNING id, workflow_id, task_template_version_id, max_concurrently_running, created_at
        "#,
    )
    .bind(max_concurrently_running)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// One Task to be inserted for a Workflow.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub node_id: i64,
    pub array_id: i64,
    pub command: String,
    pub max_attempts: i32,
    pub compute_resources: serde_json::Value,
    pub resource_scaling: Option<serde_json::Value>,
    pub fallback_queues: serde_json::Value,
}

/// Bulk-insert Tasks, chunked to respect the DB row-limit,
/// each chunk its own transaction. Idempotent on (workflow_id, node_id) so
/// a retried bind does not create duplicate Tasks for the same Node.
pub async fn bulk_insert_tasks(
    pool: &PgPool,
    workflow_id: i64,
    specs: &[TaskSpec],
) -> Result<Vec<TaskRow>, DbError> {
    let mut all_rows = Vec::with_capacity(specs.len());

    for chunk in specs.chunks(CHUNK_SIZE) {
        let mut tx = pool.begin().await?;
        for spec in chunk {
            let row = sqlx::query_as::<_, TaskRow>(
                r#"
                INSERT INTO tasks
                    (workflow_id, node_id, array_id, command, max_attempts, compute_resources, resource_scaling, fallback_queues)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (workflow_id, node_id) DO UPDATE
                    SET command = tasks.command
                RETURNING id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
                          status, compute_resources, resource_scaling, fallback_queues, status_date
                "#,
            )
            .bind(workflow_id)
            .bind(spec.node_id)
            .bind(spec.array_id)
            .bind(&spec.command)
            .bind(spec.max_attempts)
            .bind(&spec.compute_resources)
            .bind(&spec.resource_scaling)
            .bind(&spec.fallback_queues)
            .fetch_one(&mut *tx)
            .await?;

            all_rows.push(row);
        }
        tx.commit().await?;
    }

    Ok(all_rows)
}

pub async fn get_task(pool: &PgPool, id: i64) -> Result<TaskRow, DbError> {
    sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
               status, compute_resources, resource_scaling, fallback_queues, status_date
        FROM tasks WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn list_tasks_for_workflow(pool: &PgPool, workflow_id: i64) -> Result<Vec<TaskRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
               status, compute_resources, resource_scaling, fallback_queues, status_date
        FROM tasks WHERE workflow_id = $1
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Tasks changed since `since` — the basis for the incremental
/// `task_status_updates` endpoint.
pub async fn list_tasks_changed_since(
    pool: &PgPool,
    workflow_id: i64,
    since: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<TaskRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
               status, compute_resources, resource_scaling, fallback_queues, status_date
        FROM tasks WHERE workflow_id = $1 AND status_date > $2
        "#,
    )
    .bind(workflow_id)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Set a Task's status. Called only from `engine::transitions` — the sole
/// mutator of status.
pub async fn set_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
    status: char,
) -> Result<TaskRow, DbError> {
    sqlx::query_as::<_, TaskRow>(
        r#"
        UPDATE tasks SET status = $1, status_date = now()
        WHERE id = $2
        RETURNING id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
                  status, compute_resources, resource_scaling, fallback_queues, status_date
        "#,
    )
    .bind(status.to_string())
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn increment_num_attempts(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
) -> Result<TaskRow, DbError> {
    sqlx::query_as::<_, TaskRow>(
        r#"
        UPDATE tasks SET num_attempts = num_attempts + 1, status_date = now()
        WHERE id = $1
        RETURNING id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
                  status, compute_resources, resource_scaling, fallback_queues, status_date
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn set_compute_resources(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
    compute_resources: serde_json::Value,
) -> Result<TaskRow, DbError> {
    sqlx::query_as::<_, TaskRow>(
        r#"
        UPDATE tasks SET compute_resources = $1, status_date = now()
        WHERE id = $2
        RETURNING id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
                  status, compute_resources, resource_scaling, fallback_queues, status_date
        "#,
    )
    .bind(compute_resources)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

/// Look up the Task instantiating a given Node within a Workflow, locked
/// for update — used by downstream-activation cascades.
pub async fn get_task_by_node(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: i64,
    node_id: i64,
) -> Result<TaskRow, DbError> {
    sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
               status, compute_resources, resource_scaling, fallback_queues, status_date
        FROM tasks WHERE workflow_id = $1 AND node_id = $2 FOR UPDATE
        "#,
    )
    .bind(workflow_id)
    .bind(node_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn lock_task_for_update(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
) -> Result<TaskRow, DbError> {
    sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, workflow_id, node_id, array_id, command, max_attempts, num_attempts,
               status, compute_resources, resource_scaling, fallback_queues, status_date
        FROM tasks WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

/// Count Tasks in a non-terminal "in flight" status ({I, O, R}) for a
/// Workflow — used by the Run Controller's concurrency cap.
pub async fn count_running_for_workflow(pool: &PgPool, workflow_id: i64) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks WHERE workflow_id = $1 AND status IN ('I', 'O', 'R')",
    )
    .bind(workflow_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn count_running_for_array(pool: &PgPool, array_id: i64) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks WHERE array_id = $1 AND status IN ('I', 'O', 'R')",
    )
    .bind(array_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Non-terminal Tasks belonging to a Workflow that has been run before but
/// has no current WorkflowRun left to progress them — Reaper candidates
/// for a forced terminal status. A Workflow that was
/// only ever bound and never started (no WorkflowRun at all yet) is
/// excluded; its Tasks are simply waiting for their first run.
pub async fn list_orphaned_non_terminal(pool: &PgPool) -> Result<Vec<TaskRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT t.id, t.workflow_id, t.node_id, t.array_id, t.command, t.max_attempts,
               t.num_attempts, t.status, t.compute_resources, t.resource_scaling,
               t.fallback_queues, t.status_date
        FROM tasks t
        WHERE t.status NOT IN ('D', 'F')
          AND EXISTS (SELECT 1 FROM workflow_runs wfr WHERE wfr.workflow_id = t.workflow_id)
          AND NOT EXISTS (
              SELECT 1 FROM workflow_runs wfr
              WHERE wfr.workflow_id = t.workflow_id AND wfr.status IN ('G', 'B')
          )
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_running_for_template(
    pool: &PgPool,
    workflow_id: i64,
    task_template_version_id: i64,
) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM tasks t
        JOIN arrays a ON a.id = t.array_id
        WHERE t.workflow_id = $1 AND a.task_template_version_id = $2
          AND t.status IN ('I', 'O', 'R')
        "#,
    )
    .bind(workflow_id)
    .bind(task_template_version_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Look up a previously-recorded `queue_task_batch` call by its idempotency
/// key, returning the TaskInstance ids it created if this (array, batch_key)
/// pair has already been served.
pub async fn get_batch_request(
    pool: &PgPool,
    array_id: i64,
    batch_key: &str,
) -> Result<Option<Vec<i64>>, DbError> {
    let row: Option<(serde_json::Value,)> = sqlx::query_as(
        "SELECT task_instance_ids FROM array_batch_requests WHERE array_id = $1 AND batch_key = $2",
    )
    .bind(array_id)
    .bind(batch_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(ids,)| serde_json::from_value(ids).unwrap_or_default()))
}

/// Claim a (array, batch_key) pair before creating any TaskInstances for
/// it, so two concurrent retries of the same batch can't both win: the one
/// whose placeholder insert is rejected by the unique index must not create
/// instances at all, rather than racing the winner to `finalize_batch_request`
/// after the fact. Returns `true` if this call claimed it.
pub async fn claim_batch_request(
    tx: &mut Transaction<'_, Postgres>,
    array_id: i64,
    batch_key: &str,
) -> Result<bool, DbError> {
    let claimed = sqlx::query(
        r#"
        INSERT INTO array_batch_requests (array_id, batch_key, task_instance_ids)
        VALUES ($1, $2, '[]')
        ON CONFLICT (array_id, batch_key) DO NOTHING
        "#,
    )
    .bind(array_id)
    .bind(batch_key)
    .execute(&mut **tx)
    .await?
    .rows_affected()
        > 0;
    Ok(claimed)
}

/// Fill in the TaskInstance ids for a batch this call claimed, within the
/// same transaction that created them.
pub async fn finalize_batch_request(
    tx: &mut Transaction<'_, Postgres>,
    array_id: i64,
    batch_key: &str,
    task_instance_ids: &[i64],
) -> Result<(), DbError> {
    sqlx::query("UPDATE array_batch_requests SET task_instance_ids = $1 WHERE array_id = $2 AND batch_key = $3")
        .bind(serde_json::to_value(task_instance_ids).unwrap_or_default())
        .bind(array_id)
        .bind(batch_key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
