//! TaskInstance — one execution attempt of a Task.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::{models::{TaskInstanceErrorLogRow, TaskInstanceRow}, DbError};

pub async fn create_task_instance(
    tx: &mut Transaction<'_, Postgres>,
    task_id: i64,
    attempt: i32,
) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        INSERT INTO task_instances (task_id, attempt, status)
        VALUES ($1, $2, 'Q')
        RETURNING id, task_id, attempt, status, distributor_id, batch_id, node_name,
                  stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
                  created_at, status_date
        "#,
    )
    .bind(task_id)
    .bind(attempt)
    .fetch_one(&mut **tx)
    .await
    .map_err(DbError::from)
}

pub async fn get_task_instance(pool: &PgPool, id: i64) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        SELECT id, task_id, attempt, status, distributor_id, batch_id, node_name,
               stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
               created_at, status_date
        FROM task_instances WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn lock_task_instance_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        SELECT id, task_id, attempt, status, distributor_id, batch_id, node_name,
               stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
               created_at, status_date
        FROM task_instances WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn list_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<TaskInstanceRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        SELECT id, task_id, attempt, status, distributor_id, batch_id, node_name,
               stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
               created_at, status_date
        FROM task_instances WHERE task_id = $1 ORDER BY attempt ASC
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    status: char,
) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        UPDATE task_instances SET status = $1, status_date = now()
        WHERE id = $2
        RETURNING id, task_id, attempt, status, distributor_id, batch_id, node_name,
                  stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
                  created_at, status_date
        "#,
    )
    .bind(status.to_string())
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn set_node_name(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    node_name: &str,
) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        UPDATE task_instances SET node_name = $1
        WHERE id = $2
        RETURNING id, task_id, attempt, status, distributor_id, batch_id, node_name,
                  stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
                  created_at, status_date
        "#,
    )
    .bind(node_name)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn set_distributor_id(
    pool: &PgPool,
    id: i64,
    distributor_id: &str,
) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        UPDATE task_instances SET distributor_id = $1
        WHERE id = $2
        RETURNING id, task_id, attempt, status, distributor_id, batch_id, node_name,
                  stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
                  created_at, status_date
        "#,
    )
    .bind(distributor_id)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn set_batch_id(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    batch_id: &str,
) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        UPDATE task_instances SET batch_id = $1
        WHERE id = $2
        RETURNING id, task_id, attempt, status, distributor_id, batch_id, node_name,
                  stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
                  created_at, status_date
        "#,
    )
    .bind(batch_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn refresh_heartbeat(
    pool: &PgPool,
    id: i64,
    next_report_by: DateTime<Utc>,
) -> Result<TaskInstanceRow, DbError> {
    sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        UPDATE task_instances
        SET next_report_by = GREATEST(COALESCE(next_report_by, $1), $1)
        WHERE id = $2
        RETURNING id, task_id, attempt, status, distributor_id, batch_id, node_name,
                  stdout_path, stderr_path, wallclock_sec, max_rss_bytes, next_report_by,
                  created_at, status_date
        "#,
    )
    .bind(next_report_by)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn insert_error_log(
    tx: &mut Transaction<'_, Postgres>,
    task_instance_id: i64,
    error_class: &str,
    error_message: &str,
) -> Result<TaskInstanceErrorLogRow, DbError> {
    sqlx::query_as::<_, TaskInstanceErrorLogRow>(
        r#"
        INSERT INTO task_instance_error_logs (task_instance_id, error_class, error_message)
        VALUES ($1, $2, $3)
        RETURNING id, task_instance_id, error_class, error_message, logged_at
        "#,
    )
    .bind(task_instance_id)
    .bind(error_class)
    .bind(error_message)
    .fetch_one(&mut **tx)
    .await
    .map_err(DbError::from)
}

pub async fn list_error_logs(
    pool: &PgPool,
    task_instance_id: i64,
) -> Result<Vec<TaskInstanceErrorLogRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskInstanceErrorLogRow>(
        "SELECT id, task_instance_id, error_class, error_message, logged_at FROM task_instance_error_logs WHERE task_instance_id = $1 ORDER BY logged_at ASC",
    )
    .bind(task_instance_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Non-terminal TaskInstances whose lease has lapsed and whose owning
/// WorkflowRun is no longer current — Reaper candidates for `X`
/// (no-heartbeat).
pub async fn list_stale_non_current(pool: &PgPool) -> Result<Vec<TaskInstanceRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        SELECT ti.id, ti.task_id, ti.attempt, ti.status, ti.distributor_id, ti.batch_id,
               ti.node_name, ti.stdout_path, ti.stderr_path, ti.wallclock_sec,
               ti.max_rss_bytes, ti.next_report_by, ti.created_at, ti.status_date
        FROM task_instances ti
        JOIN tasks t ON t.id = ti.task_id
        JOIN workflow_runs wfr ON wfr.workflow_id = t.workflow_id
        WHERE ti.status IN ('I', 'O', 'R')
          AND ti.next_report_by IS NOT NULL
          AND ti.next_report_by < now()
          AND wfr.status NOT IN ('G', 'B')
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Count in-flight TaskInstances for a Workflow that never received a
/// distributor id — there is no scheduler handle left to probe, so their
/// state cannot be recovered on resume.
pub async fn count_unrecoverable_in_flight(pool: &PgPool, workflow_id: i64) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM task_instances ti
        JOIN tasks t ON t.id = ti.task_id
        WHERE t.workflow_id = $1 AND ti.status IN ('I', 'O', 'R') AND ti.distributor_id IS NULL
        "#,
    )
    .bind(workflow_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Every non-terminal TaskInstance belonging to a Workflow — used by cold
/// resume to force `K → F`.
pub async fn list_non_terminal_for_workflow(
    pool: &PgPool,
    workflow_id: i64,
) -> Result<Vec<TaskInstanceRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        SELECT ti.id, ti.task_id, ti.attempt, ti.status, ti.distributor_id, ti.batch_id,
               ti.node_name, ti.stdout_path, ti.stderr_path, ti.wallclock_sec,
               ti.max_rss_bytes, ti.next_report_by, ti.created_at, ti.status_date
        FROM task_instances ti
        JOIN tasks t ON t.id = ti.task_id
        WHERE t.workflow_id = $1 AND ti.status IN ('Q', 'I', 'O', 'R')
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
