//! TaskTemplate / TaskTemplateVersion — hash-deduplicated on insert
//!. A version is identified by the triple
//! (template id, command-template string, canonical arg-name set).

use sqlx::PgPool;

use crate::{
    hash::hash_parts,
    models::{TaskTemplateRow, TaskTemplateVersionRow},
    DbError,
};

pub async fn get_or_create_task_template(
    pool: &PgPool,
    tool_version_id: i64,
    name: &str,
) -> Result<(TaskTemplateRow, bool), DbError> {
    if let Some(row) = sqlx::query_as::<_, TaskTemplateRow>(
        "SELECT id, tool_version_id, name, created_at FROM task_templates WHERE tool_version_id = $1 AND name = $2",
    )
    .bind(tool_version_id)
    .bind(name)
    .fetch_optional(pool)
    .await?
    {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, TaskTemplateRow>(
        r#"
        INSERT INTO task_templates (tool_version_id, name) VALUES ($1, $2)
        ON CONFLICT (tool_version_id, name) DO NOTHING
        RETURNING id, tool_version_id, name, created_at
        "#,
    )
    .bind(tool_version_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        None => {
            let row = sqlx::query_as::<_, TaskTemplateRow>(
                "SELECT id, tool_version_id, name, created_at FROM task_templates WHERE tool_version_id = $1 AND name = $2",
            )
            .bind(tool_version_id)
            .bind(name)
            .fetch_one(pool)
            .await?;
            Ok((row, false))
        }
    }
}

/// Compute the identity hash of a TaskTemplateVersion from its triple:
/// (template id, command-template string, canonical arg-name set).
pub fn task_template_version_hash(
    task_template_id: i64,
    command_template: &str,
    arg_names: &serde_json::Value,
) -> i64 {
    let canonical_args = crate::hash::canonicalize(arg_names).to_string();
    hash_parts(&[
        &task_template_id.to_string(),
        command_template.trim(),
        &canonical_args,
    ])
}

pub async fn get_or_create_task_template_version(
    pool: &PgPool,
    task_template_id: i64,
    command_template: &str,
    arg_names: serde_json::Value,
) -> Result<(TaskTemplateVersionRow, bool), DbError> {
    let hash = task_template_version_hash(task_template_id, command_template, &arg_names);

    if let Some(row) = sqlx::query_as::<_, TaskTemplateVersionRow>(
        "SELECT id, task_template_id, command_template, arg_names, hash, created_at FROM task_template_versions WHERE hash = $1",
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?
    {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, TaskTemplateVersionRow>(
        r#"
        INSERT INTO task_template_versions (task_template_id, command_template, arg_names, hash)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (hash) DO NOTHING
        RETURNING id, task_template_id, command_template, arg_names, hash, created_at
        "#,
    )
    .bind(task_template_id)
    .bind(command_template)
    .bind(&arg_names)
    .bind(hash)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        None => {
            let row = sqlx::query_as::<_, TaskTemplateVersionRow>(
                "SELECT id, task_template_id, command_template, arg_names, hash, created_at FROM task_template_versions WHERE hash = $1",
            )
            .bind(hash)
            .fetch_one(pool)
            .await?;
            Ok((row, false))
        }
    }
}
