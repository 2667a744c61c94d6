//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the Transition Service, Run Controller, DAG
/// validation, and Resource-Adjustment Policy.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ DAG validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    /// Topological sort detected a cycle (a self-dependency is the
    /// smallest case of this).
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    // ------ Transition Service errors ------

    /// The requested `(current, target)` pair is not in `legal_edges`.
    #[error("invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: char,
        to: char,
    },

    /// A DB-level concurrency conflict (row lost a race) that outlived the
    /// retry bound.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A distributor/worker call arrived from a WorkflowRun that was
    /// superseded by a newer run.
    #[error("workflow run {0} is no longer current")]
    WorkflowRunNotCurrent(i64),

    /// Malformed request or unknown id.
    #[error("validation error: {0}")]
    Validation(String),

    /// Username does not match the current run's owner.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Persistence error from the `db` crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// Short machine-readable error code for the `{code, message, details}`
    /// HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNodeId(_)
            | Self::UnknownNodeReference { .. }
            | Self::CycleDetected
            | Self::Validation(_) => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::WorkflowRunNotCurrent(_) => "workflow_run_not_current",
            Self::Unauthorized(_) => "unauthorized",
            Self::Database(db::DbError::NotFound) => "not_found",
            Self::Database(_) => "internal",
        }
    }
}
