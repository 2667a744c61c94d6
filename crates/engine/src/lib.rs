//! `engine` crate — status state machines, the Transition Service, DAG
//! validation, the Resource-Adjustment Policy, and the Run Controller.
//!
//! This is the one crate allowed to mutate `status` columns: `db` only
//! knows how to read and write rows, `nodes` only knows how to talk to a
//! batch scheduler. Everything that decides *when* a transition is legal,
//! and what it cascades into, lives here.

pub mod dag;
pub mod error;
pub mod models;
pub mod resource_adjustment;
pub mod status;
pub mod swarm;
pub mod transitions;

pub use dag::validate_dag;
pub use error::EngineError;
pub use models::{BatchKey, DagDefinition, EdgeDefinition};
pub use status::{roll_up_workflow_status, TaskInstanceStatus, TaskStatus, WorkflowStatus};
pub use swarm::{RunController, RunControllerConfig, RunOutcome};
