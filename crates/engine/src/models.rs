//! In-memory domain types shared across the engine's DAG validation,
//! Run Controller, and Resource-Adjustment Policy. Persisted rows live in
//! `db::models`; these types describe shapes that only exist transiently
//! while the engine reasons about a workflow.

use serde::{Deserialize, Serialize};

/// A workflow graph prior to persistence: Node identity here is whatever
/// the caller supplied (bind-time node args), not yet the hash-derived
/// primary key `db::repository::dag` assigns on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagDefinition {
    pub nodes: Vec<String>,
    pub edges: Vec<EdgeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
}

/// Grouping key the Run Controller batches eligible Tasks by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub array_id: i64,
    pub resource_fingerprint: i64,
    pub queue: String,
}
