//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A write would violate a uniqueness invariant (e.g. the "one current
    /// WorkflowRun per Workflow" partial unique index). Callers resolve by
    /// re-reading rather than by inspecting the underlying constraint name.
    #[error("conflict: {0}")]
    Conflict(String),
}
