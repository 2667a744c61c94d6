//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no transition behaviour.
//! The state machines and cascade rules live in the `engine` crate; this
//! module only describes what a row looks like.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Tool / ToolVersion — immutable after creation.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ToolRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ToolVersionRow {
    pub id: i64,
    pub tool_id: i64,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TaskTemplate / TaskTemplateVersion — hash-deduplicated on insert.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskTemplateRow {
    pub id: i64,
    pub tool_version_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskTemplateVersionRow {
    pub id: i64,
    pub task_template_id: i64,
    pub command_template: String,
    pub arg_names: serde_json::Value,
    pub hash: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Node / Edge / DAG
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRow {
    pub id: i64,
    pub task_template_version_id: i64,
    pub node_args: serde_json::Value,
    pub hash: i64,
    pub created_at: DateTime<Utc>,
}

/// One row per (DAG, Node). Upstream/downstream are structured JSON arrays
/// of Node ids, never quoted strings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EdgeRow {
    pub id: i64,
    pub dag_id: i64,
    pub node_id: i64,
    pub upstream_node_ids: serde_json::Value,
    pub downstream_node_ids: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DagRow {
    pub id: i64,
    pub hash: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Workflow / WorkflowRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: i64,
    pub tool_id: i64,
    pub dag_id: i64,
    pub workflow_args: serde_json::Value,
    pub workflow_attrs: serde_json::Value,
    pub hash: i64,
    pub max_concurrently_running: i32,
    pub created_at: DateTime<Utc>,
}

/// WorkflowRun status — single ASCII character, preserved for wire
/// compatibility.
///
/// `G` registering, `B` bound (actively controlling), `D` done, `F` failed,
/// `H` halted (timeout/no-heartbeat, resumable), `C` cold-resume (forces
/// in-flight TaskInstances to terminal, resumable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowRunStatusCode {
    Registering,
    Bound,
    Done,
    Failed,
    Halted,
    ColdResume,
}

impl WorkflowRunStatusCode {
    pub fn as_char(self) -> char {
        match self {
            Self::Registering => 'G',
            Self::Bound => 'B',
            Self::Done => 'D',
            Self::Failed => 'F',
            Self::Halted => 'H',
            Self::ColdResume => 'C',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'G' => Some(Self::Registering),
            'B' => Some(Self::Bound),
            'D' => Some(Self::Done),
            'F' => Some(Self::Failed),
            'H' => Some(Self::Halted),
            'C' => Some(Self::ColdResume),
            _ => None,
        }
    }

    /// Non-terminal, non-superseded — the "current" run for its Workflow.
    pub fn is_current(self) -> bool {
        matches!(self, Self::Registering | Self::Bound)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowRunStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRow {
    pub id: i64,
    pub workflow_id: i64,
    #[sqlx(rename = "user")]
    pub user: String,
    pub jobmon_version: String,
    pub status: String,
    pub registered_at: DateTime<Utc>,
    pub next_report_by: DateTime<Utc>,
    pub status_date: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArrayRow {
    pub id: i64,
    pub workflow_id: i64,
    pub task_template_version_id: i64,
    pub max_concurrently_running: Option<i32>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub workflow_id: i64,
    pub node_id: i64,
    pub array_id: i64,
    pub command: String,
    pub max_attempts: i32,
    pub num_attempts: i32,
    pub status: String,
    pub compute_resources: serde_json::Value,
    pub resource_scaling: Option<serde_json::Value>,
    pub fallback_queues: serde_json::Value,
    pub status_date: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TaskInstance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskInstanceRow {
    pub id: i64,
    pub task_id: i64,
    pub attempt: i32,
    pub status: String,
    pub distributor_id: Option<String>,
    pub batch_id: Option<String>,
    pub node_name: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub wallclock_sec: Option<f64>,
    pub max_rss_bytes: Option<i64>,
    pub next_report_by: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub status_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskInstanceErrorLogRow {
    pub id: i64,
    pub task_instance_id: i64,
    pub error_class: String,
    pub error_message: String,
    pub logged_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reaper lease
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReaperLeaseRow {
    pub id: i32,
    pub holder: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}
