//! WorkflowRun — one execution attempt of a Workflow; holds the heartbeat
//! lease. At most one WorkflowRun per Workflow is
//! "current" (non-terminal, non-superseded) at any time — enforced by the
//! partial unique index `one_current_workflow_run_per_workflow`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{models::WorkflowRunRow, DbError};

/// Create a new WorkflowRun. Fails with `DbError::Conflict` if the
/// Workflow already has a current (non-terminal) run — the caller must
/// first transition the prior run to `H` or `C`.
pub async fn create_workflow_run(
    pool: &PgPool,
    workflow_id: i64,
    user: &str,
    jobmon_version: &str,
    next_report_by: DateTime<Utc>,
) -> Result<WorkflowRunRow, DbError> {
    let result = sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        INSERT INTO workflow_runs (workflow_id, "user", jobmon_version, status, next_report_by)
        VALUES ($1, $2, $3, 'G', $4)
        RETURNING id, workflow_id, "user", jobmon_version, status, registered_at, next_report_by, status_date
        "#,
    )
    .bind(workflow_id)
    .bind(user)
    .bind(jobmon_version)
    .bind(next_report_by)
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => Ok(row),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(DbError::Conflict(
            format!("workflow {workflow_id} already has a current WorkflowRun"),
        )),
        Err(e) => Err(DbError::from(e)),
    }
}

pub async fn get_workflow_run(pool: &PgPool, id: i64) -> Result<WorkflowRunRow, DbError> {
    sqlx::query_as::<_, WorkflowRunRow>(
        r#"SELECT id, workflow_id, "user", jobmon_version, status, registered_at, next_report_by, status_date FROM workflow_runs WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// The run currently holding the lease for a Workflow, if any
/// (status ∈ {G, B}).
pub async fn get_current_workflow_run(
    pool: &PgPool,
    workflow_id: i64,
) -> Result<Option<WorkflowRunRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        SELECT id, workflow_id, "user", jobmon_version, status, registered_at, next_report_by, status_date
        FROM workflow_runs
        WHERE workflow_id = $1 AND status IN ('G', 'B')
        "#,
    )
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Most recent WorkflowRun for a Workflow regardless of status — used to
/// attribute ownership once no run is current.
pub async fn get_latest_workflow_run(
    pool: &PgPool,
    workflow_id: i64,
) -> Result<Option<WorkflowRunRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        SELECT id, workflow_id, "user", jobmon_version, status, registered_at, next_report_by, status_date
        FROM workflow_runs
        WHERE workflow_id = $1
        ORDER BY registered_at DESC
        LIMIT 1
        "#,
    )
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn update_status(
    pool: &PgPool,
    id: i64,
    status: char,
) -> Result<WorkflowRunRow, DbError> {
    sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        UPDATE workflow_runs SET status = $1, status_date = now()
        WHERE id = $2
        RETURNING id, workflow_id, "user", jobmon_version, status, registered_at, next_report_by, status_date
        "#,
    )
    .bind(status.to_string())
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Refresh the heartbeat lease. Monotonic non-decreasing per entity within
/// one process — a stale refresh racing a newer
/// one is a harmless no-op rather than rolling the deadline backwards.
pub async fn refresh_heartbeat(
    pool: &PgPool,
    id: i64,
    next_report_by: DateTime<Utc>,
) -> Result<WorkflowRunRow, DbError> {
    sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        UPDATE workflow_runs
        SET next_report_by = GREATEST(next_report_by, $1)
        WHERE id = $2
        RETURNING id, workflow_id, "user", jobmon_version, status, registered_at, next_report_by, status_date
        "#,
    )
    .bind(next_report_by)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// WorkflowRuns whose lease has lapsed — Reaper candidates.
pub async fn list_stale_workflow_runs(pool: &PgPool) -> Result<Vec<WorkflowRunRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        SELECT id, workflow_id, "user", jobmon_version, status, registered_at, next_report_by, status_date
        FROM workflow_runs
        WHERE status IN ('G', 'B') AND next_report_by < now()
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
