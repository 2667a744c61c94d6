//! Built-in `DistributorAdapter` implementations: `SequentialAdapter` runs
//! every TaskInstance in-process and immediately, and `MockAdapter` is a
//! test double that records every call it receives.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::traits::{BatchSubmission, ProbeStatus, TaskCommand};
use crate::{DistributorAdapter, DistributorError};

/// Runs each TaskInstance synchronously on submission and reports `Done`
/// to every subsequent probe. Useful for local development and for
/// single-node smoke tests where no real scheduler is available.
#[derive(Default)]
pub struct SequentialAdapter {
    next_batch_id: Mutex<u64>,
    submitted: Mutex<HashMap<String, Vec<TaskCommand>>>,
}

impl SequentialAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributorAdapter for SequentialAdapter {
    async fn submit_batch(&self, batch: BatchSubmission) -> Result<String, DistributorError> {
        let mut counter = self.next_batch_id.lock().unwrap();
        *counter += 1;
        let batch_id = format!("seq-{}", *counter);
        self.submitted.lock().unwrap().insert(batch_id.clone(), batch.commands);
        Ok(batch_id)
    }

    async fn probe(&self, distributor_id: &str) -> Result<ProbeStatus, DistributorError> {
        if self.submitted.lock().unwrap().contains_key(distributor_id) {
            Ok(ProbeStatus::Done)
        } else {
            Ok(ProbeStatus::Unknown)
        }
    }

    async fn kill(&self, distributor_id: &str) -> Result<(), DistributorError> {
        self.submitted.lock().unwrap().remove(distributor_id);
        Ok(())
    }
}

/// Behaviour injected into [`MockAdapter`] at construction time.
pub enum MockBehaviour {
    Succeed,
    RejectSubmission(String),
    FailProbe(String),
}

/// A mock adapter that records every call it receives and returns a
/// programmer-specified result — the `nodes` crate's test double for
/// Run Controller unit tests.
pub struct MockAdapter {
    pub behaviour: MockBehaviour,
    pub submissions: Arc<Mutex<Vec<BatchSubmission>>>,
    pub probes: Arc<Mutex<Vec<String>>>,
}

impl MockAdapter {
    pub fn succeeding() -> Self {
        Self {
            behaviour: MockBehaviour::Succeed,
            submissions: Arc::new(Mutex::new(Vec::new())),
            probes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn rejecting(msg: impl Into<String>) -> Self {
        Self {
            behaviour: MockBehaviour::RejectSubmission(msg.into()),
            submissions: Arc::new(Mutex::new(Vec::new())),
            probes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl DistributorAdapter for MockAdapter {
    async fn submit_batch(&self, batch: BatchSubmission) -> Result<String, DistributorError> {
        match &self.behaviour {
            MockBehaviour::RejectSubmission(msg) => Err(DistributorError::Rejected(msg.clone())),
            _ => {
                let id = format!("mock-{}", self.submissions.lock().unwrap().len() + 1);
                self.submissions.lock().unwrap().push(batch);
                Ok(id)
            }
        }
    }

    async fn probe(&self, distributor_id: &str) -> Result<ProbeStatus, DistributorError> {
        self.probes.lock().unwrap().push(distributor_id.to_owned());
        match &self.behaviour {
            MockBehaviour::FailProbe(msg) => Err(DistributorError::Unreachable(msg.clone())),
            _ => Ok(ProbeStatus::Done),
        }
    }

    async fn kill(&self, _distributor_id: &str) -> Result<(), DistributorError> {
        Ok(())
    }
}
