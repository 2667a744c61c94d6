//! Single-character status codes for every entity the Transition Service
//! mutates.

use serde::{Deserialize, Serialize};

/// Task status.
///
/// `G` registering → `Q` queued → `I` instantiating → `O` launched →
/// `R` running → `D` done ∎; from `R` on a retriable TI error: `E`
/// error-recoverable, `A` adjusting resources (→ `Q` retry edge), or
/// `F` fatal ∎.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Registering,
    Queued,
    Instantiating,
    Launched,
    Running,
    Done,
    ErrorRecoverable,
    AdjustingResources,
    Fatal,
}

impl TaskStatus {
    pub fn as_char(self) -> char {
        match self {
            Self::Registering => 'G',
            Self::Queued => 'Q',
            Self::Instantiating => 'I',
            Self::Launched => 'O',
            Self::Running => 'R',
            Self::Done => 'D',
            Self::ErrorRecoverable => 'E',
            Self::AdjustingResources => 'A',
            Self::Fatal => 'F',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'G' => Some(Self::Registering),
            'Q' => Some(Self::Queued),
            'I' => Some(Self::Instantiating),
            'O' => Some(Self::Launched),
            'R' => Some(Self::Running),
            'D' => Some(Self::Done),
            'E' => Some(Self::ErrorRecoverable),
            'A' => Some(Self::AdjustingResources),
            'F' => Some(Self::Fatal),
            _ => None,
        }
    }

    /// `D` is frozen; `F` is also terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Fatal)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Instantiating | Self::Launched | Self::Running)
    }

    /// Legal (current, target) pairs for `transition_task`.
    pub fn can_transition_to(self, target: Self) -> bool {
        use TaskStatus::*;
        matches!(
            (self, target),
            (Registering, Queued)
                | (Queued, Instantiating)
                | (Instantiating, Launched)
                | (Launched, Running)
                | (Running, Done)
                | (Running, ErrorRecoverable)
                | (Running, AdjustingResources)
                | (Running, Fatal)
                | (AdjustingResources, Queued)
                | (ErrorRecoverable, Queued)
                | (Instantiating, Fatal) // distributor rejects the batch outright
                | (Launched, Fatal)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// TaskInstance status.
///
/// `Q` queued → `I` instantiated → `O` launched → `R` running → `D` done ∎;
/// from `R` (or earlier) an error classification routes to `E`, `Z`, `X`,
/// `U`, or `F`. `K` (kill-self, used only by cold resume) always lands on
/// `F` and is modeled here as a transition target rather than a resting
/// status, since nothing ever observes a TaskInstance "in" `K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskInstanceStatus {
    Queued,
    Instantiated,
    Launched,
    Running,
    Done,
    Error,
    ResourceError,
    NoHeartbeat,
    UnknownError,
    Fatal,
}

impl TaskInstanceStatus {
    pub fn as_char(self) -> char {
        match self {
            Self::Queued => 'Q',
            Self::Instantiated => 'I',
            Self::Launched => 'O',
            Self::Running => 'R',
            Self::Done => 'D',
            Self::Error => 'E',
            Self::ResourceError => 'Z',
            Self::NoHeartbeat => 'X',
            Self::UnknownError => 'U',
            Self::Fatal => 'F',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'Q' => Some(Self::Queued),
            'I' => Some(Self::Instantiated),
            'O' => Some(Self::Launched),
            'R' => Some(Self::Running),
            'D' => Some(Self::Done),
            'E' => Some(Self::Error),
            'Z' => Some(Self::ResourceError),
            'X' => Some(Self::NoHeartbeat),
            'U' => Some(Self::UnknownError),
            'F' => Some(Self::Fatal),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Error | Self::ResourceError | Self::NoHeartbeat | Self::UnknownError | Self::Fatal
        )
    }

    /// Error classes the Task cascade retries. `F` is not retriable — it is itself a Task-fatal signal.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Error | Self::ResourceError | Self::NoHeartbeat | Self::UnknownError)
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        use TaskInstanceStatus::*;
        matches!(
            (self, target),
            (Queued, Instantiated)
                | (Instantiated, Launched)
                | (Launched, Running)
                | (Running, Done)
                | (Running, Error)
                | (Running, ResourceError)
                | (Running, NoHeartbeat)
                | (Running, UnknownError)
                | (Running, Fatal)
                | (Instantiated, Error)
                | (Instantiated, NoHeartbeat)
                | (Instantiated, Fatal)
                | (Launched, Error)
                | (Launched, NoHeartbeat)
                | (Launched, Fatal)
                | (Queued, Fatal)
        )
        // Kill-self (`K`) is permitted from any non-terminal status, used
        // only by cold resume; modeled as a standalone allowance rather
        // than cluttering the table above.
            || (!self.is_terminal() && target == Fatal)
    }
}

impl std::fmt::Display for TaskInstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Workflow status is a derived roll-up of Task statuses, never stored as its own column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Done,
    Failed,
    Running,
    Queued,
    Halted,
}

impl WorkflowStatus {
    pub fn as_char(self) -> char {
        match self {
            Self::Done => 'D',
            Self::Failed => 'F',
            Self::Running => 'R',
            Self::Queued => 'Q',
            Self::Halted => 'H',
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Compute the Workflow-level roll-up from its Tasks' statuses.
///
/// - `D` iff every Task is `D`.
/// - `F` iff at least one Task is `F` and no Task remains in a
///   non-terminal, non-fatal status (`{G,Q,I,O,R,E,A}`).
/// - Otherwise `R` if any Task is in flight, `Q` if any Task is queued but
///   none in flight, `H` for an empty/fully-halted workflow.
pub fn roll_up_workflow_status(task_statuses: &[TaskStatus]) -> WorkflowStatus {
    if task_statuses.is_empty() {
        // An empty DAG yields an immediately-DONE workflow.
        return WorkflowStatus::Done;
    }

    if task_statuses.iter().all(|s| *s == TaskStatus::Done) {
        return WorkflowStatus::Done;
    }

    let any_fatal = task_statuses.iter().any(|s| *s == TaskStatus::Fatal);
    let any_progressing = task_statuses.iter().any(|s| {
        matches!(
            s,
            TaskStatus::Registering
                | TaskStatus::Queued
                | TaskStatus::Instantiating
                | TaskStatus::Launched
                | TaskStatus::Running
                | TaskStatus::ErrorRecoverable
                | TaskStatus::AdjustingResources
        )
    });

    if any_fatal && !any_progressing {
        return WorkflowStatus::Failed;
    }

    let any_in_flight = task_statuses.iter().any(|s| s.is_in_flight());
    if any_in_flight {
        return WorkflowStatus::Running;
    }

    let any_queued = task_statuses
        .iter()
        .any(|s| matches!(s, TaskStatus::Queued | TaskStatus::AdjustingResources | TaskStatus::ErrorRecoverable));
    if any_queued {
        return WorkflowStatus::Queued;
    }

    WorkflowStatus::Halted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_done_rolls_up_to_done() {
        let statuses = vec![TaskStatus::Done, TaskStatus::Done];
        assert_eq!(roll_up_workflow_status(&statuses), WorkflowStatus::Done);
    }

    #[test]
    fn empty_workflow_is_done() {
        assert_eq!(roll_up_workflow_status(&[]), WorkflowStatus::Done);
    }

    #[test]
    fn fatal_with_no_progress_rolls_up_to_failed() {
        let statuses = vec![TaskStatus::Done, TaskStatus::Fatal];
        assert_eq!(roll_up_workflow_status(&statuses), WorkflowStatus::Failed);
    }

    #[test]
    fn fatal_with_remaining_progress_is_not_yet_failed() {
        let statuses = vec![TaskStatus::Fatal, TaskStatus::Running];
        assert_eq!(roll_up_workflow_status(&statuses), WorkflowStatus::Running);
    }

    #[test]
    fn task_status_transition_table_rejects_done_to_anything() {
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Queued));
    }

    #[test]
    fn task_instance_kill_self_allowed_from_any_non_terminal_status() {
        assert!(TaskInstanceStatus::Queued.can_transition_to(TaskInstanceStatus::Fatal));
        assert!(TaskInstanceStatus::Running.can_transition_to(TaskInstanceStatus::Fatal));
        assert!(!TaskInstanceStatus::Done.can_transition_to(TaskInstanceStatus::Fatal));
    }
}
