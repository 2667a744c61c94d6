//! Node / Edge / DAG — hash-deduplicated entities.
//!
//! A Node is identified by (TaskTemplateVersion, canonical node-args JSON).
//! A DAG is identified by a hash over its edge set. Edge rows are bulk
//! inserted in chunks and are idempotent (unique on (dag_id, node_id)).

use sqlx::PgPool;

use crate::{
    hash::{canonicalize, hash_parts},
    models::{DagRow, EdgeRow, NodeRow},
    DbError,
};

/// Bulk Task/Edge inserts are chunked to respect the underlying DB row
/// limit.
pub const CHUNK_SIZE: usize = 500;

/// One edge to be inserted for a given DAG: a Node plus the upstream and
/// downstream Node ids relating to it within that DAG.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub node_id: i64,
    pub upstream_node_ids: Vec<i64>,
    pub downstream_node_ids: Vec<i64>,
}

pub fn node_hash(task_template_version_id: i64, node_args: &serde_json::Value) -> i64 {
    let canonical_args = canonicalize(node_args).to_string();
    hash_parts(&[&task_template_version_id.to_string(), &canonical_args])
}

pub async fn get_or_create_node(
    pool: &PgPool,
    task_template_version_id: i64,
    node_args: serde_json::Value,
) -> Result<(NodeRow, bool), DbError> {
    let hash = node_hash(task_template_version_id, &node_args);

    if let Some(row) = sqlx::query_as::<_, NodeRow>(
        "SELECT id, task_template_version_id, node_args, hash, created_at FROM nodes WHERE hash = $1",
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?
    {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, NodeRow>(
        r#"
        INSERT INTO nodes (task_template_version_id, node_args, hash)
        VALUES ($1, $2, $3)
        ON CONFLICT (hash) DO NOTHING
        RETURNING id, task_template_version_id, node_args, hash, created_at
        "#,
    )
    .bind(task_template_version_id)
    .bind(&node_args)
    .bind(hash)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        None => {
            let row = sqlx::query_as::<_, NodeRow>(
                "SELECT id, task_template_version_id, node_args, hash, created_at FROM nodes WHERE hash = $1",
            )
            .bind(hash)
            .fetch_one(pool)
            .await?;
            Ok((row, false))
        }
    }
}

/// Hash derivation for a DAG: canonicalize each edge's (node_id, upstream,
/// downstream) triple, sort the resulting strings (edge order is not
/// identity-bearing — only the set is), and hash the joined result.
pub fn dag_hash(edges: &[EdgeSpec]) -> i64 {
    let mut parts: Vec<String> = edges
        .iter()
        .map(|e| {
            let mut upstream = e.upstream_node_ids.clone();
            let mut downstream = e.downstream_node_ids.clone();
            upstream.sort_unstable();
            downstream.sort_unstable();
            format!("{}:{:?}:{:?}", e.node_id, upstream, downstream)
        })
        .collect();
    parts.sort();
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    hash_parts(&refs)
}

pub async fn get_or_create_dag(pool: &PgPool, edges: &[EdgeSpec]) -> Result<(DagRow, bool), DbError> {
    let hash = dag_hash(edges);

    if let Some(row) =
        sqlx::query_as::<_, DagRow>("SELECT id, hash, created_at FROM dags WHERE hash = $1")
            .bind(hash)
            .fetch_optional(pool)
            .await?
    {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, DagRow>(
        r#"
        INSERT INTO dags (hash) VALUES ($1)
        ON CONFLICT (hash) DO NOTHING
        RETURNING id, hash, created_at
        "#,
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        None => {
            let row =
                sqlx::query_as::<_, DagRow>("SELECT id, hash, created_at FROM dags WHERE hash = $1")
                    .bind(hash)
                    .fetch_one(pool)
                    .await?;
            Ok((row, false))
        }
    }
}

/// Insert the Edge rows for a DAG, chunked at [`CHUNK_SIZE`] per transaction
/// and idempotent on (dag_id, node_id) so a retried bind is a no-op.
pub async fn insert_edges_bulk(
    pool: &PgPool,
    dag_id: i64,
    edges: &[EdgeSpec],
) -> Result<Vec<EdgeRow>, DbError> {
    let mut all_rows = Vec::with_capacity(edges.len());

    for chunk in edges.chunks(CHUNK_SIZE) {
        let mut tx = pool.begin().await?;
        for edge in chunk {
            let upstream = serde_json::Value::Array(
                edge.upstream_node_ids
                    .iter()
                    .map(|id| serde_json::Value::from(*id))
                    .collect(),
            );
            let downstream = serde_json::Value::Array(
                edge.downstream_node_ids
                    .iter()
                    .map(|id| serde_json::Value::from(*id))
                    .collect(),
            );

            let row = sqlx::query_as::<_, EdgeRow>(
                r#"
                INSERT INTO edges (dag_id, node_id, upstream_node_ids, downstream_node_ids)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (dag_id, node_id) DO UPDATE
                    SET upstream_node_ids = EXCLUDED.upstream_node_ids,
                        downstream_node_ids = EXCLUDED.downstream_node_ids
                RETURNING id, dag_id, node_id, upstream_node_ids, downstream_node_ids
                "#,
            )
            .bind(dag_id)
            .bind(edge.node_id)
            .bind(upstream)
            .bind(downstream)
            .fetch_one(&mut *tx)
            .await?;

            all_rows.push(row);
        }
        tx.commit().await?;
    }

    Ok(all_rows)
}

pub async fn list_edges_for_dag(pool: &PgPool, dag_id: i64) -> Result<Vec<EdgeRow>, DbError> {
    let rows = sqlx::query_as::<_, EdgeRow>(
        "SELECT id, dag_id, node_id, upstream_node_ids, downstream_node_ids FROM edges WHERE dag_id = $1",
    )
    .bind(dag_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// One row of the TaskTemplate-granularity roll-up consumed by the GUI
/// — a Node's edges, tagged with its
/// owning TaskTemplate so the caller can group by template rather than by
/// individual Node.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TemplateDagRow {
    pub node_id: i64,
    pub task_template_id: i64,
    pub task_template_name: String,
    pub upstream_node_ids: serde_json::Value,
    pub downstream_node_ids: serde_json::Value,
}

pub async fn list_template_dag(pool: &PgPool, dag_id: i64) -> Result<Vec<TemplateDagRow>, DbError> {
    let rows = sqlx::query_as::<_, TemplateDagRow>(
        r#"
        SELECT e.node_id, tt.id AS task_template_id, tt.name AS task_template_name,
               e.upstream_node_ids, e.downstream_node_ids
        FROM edges e
        JOIN nodes n ON n.id = e.node_id
        JOIN task_template_versions ttv ON ttv.id = n.task_template_version_id
        JOIN task_templates tt ON tt.id = ttv.task_template_id
        WHERE e.dag_id = $1
        "#,
    )
    .bind(dag_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Look up the single Edge row for one Node within a DAG — the Transition
/// Service's entry point to a Task's downstream neighbors.
pub async fn get_edge(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    dag_id: i64,
    node_id: i64,
) -> Result<EdgeRow, DbError> {
    sqlx::query_as::<_, EdgeRow>(
        "SELECT id, dag_id, node_id, upstream_node_ids, downstream_node_ids FROM edges WHERE dag_id = $1 AND node_id = $2",
    )
    .bind(dag_id)
    .bind(node_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}
