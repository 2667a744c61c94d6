//! Workflow — identified by a stable hash over (Tool, DAG, workflow-args,
//! canonical workflow-attrs); re-binding with the same hash is the sole
//! mechanism for "resume".

use sqlx::PgPool;

use crate::{
    hash::{canonicalize, hash_parts},
    models::WorkflowRow,
    DbError,
};

pub fn workflow_hash(
    tool_id: i64,
    dag_id: i64,
    workflow_args: &serde_json::Value,
    workflow_attrs: &serde_json::Value,
) -> i64 {
    let canonical_args = canonicalize(workflow_args).to_string();
    let canonical_attrs = canonicalize(workflow_attrs).to_string();
    hash_parts(&[
        &tool_id.to_string(),
        &dag_id.to_string(),
        &canonical_args,
        &canonical_attrs,
    ])
}

/// Get-or-create the Workflow for this (Tool, DAG, args, attrs) tuple.
/// `created = false` means this bind is a resume of an existing Workflow.
pub async fn get_or_create_workflow(
    pool: &PgPool,
    tool_id: i64,
    dag_id: i64,
    workflow_args: serde_json::Value,
    workflow_attrs: serde_json::Value,
    max_concurrently_running: i32,
) -> Result<(WorkflowRow, bool), DbError> {
    let hash = workflow_hash(tool_id, dag_id, &workflow_args, &workflow_attrs);

    if let Some(row) = fetch_by_hash(pool, hash).await? {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO workflows
            (tool_id, dag_id, workflow_args, workflow_attrs, hash, max_concurrently_running)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (hash) DO NOTHING
        RETURNING id, tool_id, dag_id, workflow_args, workflow_attrs, hash, max_concurrently_running, created_at
        "#,
    )
    .bind(tool_id)
    .bind(dag_id)
    .bind(&workflow_args)
    .bind(&workflow_attrs)
    .bind(hash)
    .bind(max_concurrently_running)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        None => {
            let row = fetch_by_hash(pool, hash).await?.ok_or(DbError::NotFound)?;
            Ok((row, false))
        }
    }
}

async fn fetch_by_hash(pool: &PgPool, hash: i64) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        "SELECT id, tool_id, dag_id, workflow_args, workflow_attrs, hash, max_concurrently_running, created_at FROM workflows WHERE hash = $1",
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_workflow(pool: &PgPool, id: i64) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        "SELECT id, tool_id, dag_id, workflow_args, workflow_attrs, hash, max_concurrently_running, created_at FROM workflows WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Read-only lookup used by the Transition Service's downstream-activation
/// cascade, which already holds a transaction open on a Task row.
pub async fn dag_id_for_workflow(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: i64,
) -> Result<i64, DbError> {
    let (dag_id,): (i64,) = sqlx::query_as("SELECT dag_id FROM workflows WHERE id = $1")
        .bind(workflow_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(dag_id)
}

pub async fn update_max_concurrently_running(
    pool: &PgPool,
    id: i64,
    max_concurrently_running: i32,
) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        r#"
        UPDATE workflows SET max_concurrently_running = $1
        WHERE id = $2
        RETURNING id, tool_id, dag_id, workflow_args, workflow_attrs, hash, max_concurrently_running, created_at
        "#,
    )
    .bind(max_concurrently_running)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}
