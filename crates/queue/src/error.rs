//! Error type for the heartbeat/reaper subsystem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("engine error: {0}")]
    Engine(#[from] engine::EngineError),
}
