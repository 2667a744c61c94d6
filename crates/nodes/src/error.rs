//! Distributor-adapter error type.

use thiserror::Error;

/// Errors a [`crate::DistributorAdapter`] implementation can return.
///
/// The Run Controller treats `Unreachable` as transient (retry the call on
/// the next poll) and `Rejected` as the batch scheduler refusing the
/// submission outright (the Task goes straight to `F`).
#[derive(Debug, Error, Clone)]
pub enum DistributorError {
    #[error("distributor unreachable: {0}")]
    Unreachable(String),

    #[error("batch scheduler rejected submission: {0}")]
    Rejected(String),
}
