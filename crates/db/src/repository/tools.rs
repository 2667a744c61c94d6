//! Tool / ToolVersion — immutable namespaces for TaskTemplates.

use sqlx::PgPool;

use crate::{models::{ToolRow, ToolVersionRow}, DbError};

/// Get-or-create a Tool by name. Returns (row, created).
pub async fn get_or_create_tool(pool: &PgPool, name: &str) -> Result<(ToolRow, bool), DbError> {
    if let Some(row) = sqlx::query_as::<_, ToolRow>(
        "SELECT id, name, created_at FROM tools WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, ToolRow>(
        r#"
        INSERT INTO tools (name) VALUES ($1)
        ON CONFLICT (name) DO NOTHING
        RETURNING id, name, created_at
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        // Lost the race to a concurrent inserter — the winner's row is the
        // one we must return.
        None => {
            let row = sqlx::query_as::<_, ToolRow>(
                "SELECT id, name, created_at FROM tools WHERE name = $1",
            )
            .bind(name)
            .fetch_one(pool)
            .await?;
            Ok((row, false))
        }
    }
}

/// Get-or-create a ToolVersion under a given Tool. Returns (row, created).
pub async fn get_or_create_tool_version(
    pool: &PgPool,
    tool_id: i64,
    version: &str,
) -> Result<(ToolVersionRow, bool), DbError> {
    if let Some(row) = sqlx::query_as::<_, ToolVersionRow>(
        "SELECT id, tool_id, version, created_at FROM tool_versions WHERE tool_id = $1 AND version = $2",
    )
    .bind(tool_id)
    .bind(version)
    .fetch_optional(pool)
    .await?
    {
        return Ok((row, false));
    }

    let inserted = sqlx::query_as::<_, ToolVersionRow>(
        r#"
        INSERT INTO tool_versions (tool_id, version) VALUES ($1, $2)
        ON CONFLICT (tool_id, version) DO NOTHING
        RETURNING id, tool_id, version, created_at
        "#,
    )
    .bind(tool_id)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok((row, true)),
        None => {
            let row = sqlx::query_as::<_, ToolVersionRow>(
                "SELECT id, tool_id, version, created_at FROM tool_versions WHERE tool_id = $1 AND version = $2",
            )
            .bind(tool_id)
            .bind(version)
            .fetch_one(pool)
            .await?;
            Ok((row, false))
        }
    }
}
