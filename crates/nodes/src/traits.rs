//! The `DistributorAdapter` trait — the thin boundary between the Run
//! Controller and a batch scheduler (Slurm, multiprocess, sequential).
//! Plugin implementations live outside this crate's core; this defines
//! only the contract the core consumes.

use async_trait::async_trait;
use serde_json::Value;

use crate::DistributorError;

/// One TaskInstance within a batch submission.
#[derive(Debug, Clone)]
pub struct TaskCommand {
    pub task_instance_id: i64,
    pub command: String,
    pub resources: Value,
}

/// A batch of TaskInstances submitted together — preserves the "submit as
/// a job array" property.
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub queue: String,
    pub commands: Vec<TaskCommand>,
}

/// Liveness/result of a previously submitted batch, as reported by
/// `probe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Running,
    Done,
    Failed(String),
    /// The scheduler has no record of this id (expired accounting, or it
    /// never actually launched).
    Unknown,
}

/// Contract every batch-scheduler plugin fulfils. All built-ins (mock,
/// sequential) and out-of-tree adapters (Slurm, multiprocess) implement
/// this.
#[async_trait]
pub trait DistributorAdapter: Send + Sync {
    /// Submit a batch, returning the scheduler's batch id.
    async fn submit_batch(&self, batch: BatchSubmission) -> Result<String, DistributorError>;

    /// Probe a previously submitted distributor id for its current state.
    async fn probe(&self, distributor_id: &str) -> Result<ProbeStatus, DistributorError>;

    /// Request the scheduler kill a running distributor id (cold resume).
    async fn kill(&self, distributor_id: &str) -> Result<(), DistributorError>;
}
