//! `queue` crate — the Heartbeat & Reaper subsystem.
//!
//! Owns no domain logic of its own: lease acquisition lives in
//! `db::repository::reaper`, and every status mutation the Reaper makes
//! goes through `engine::transitions`, exactly as the Run Controller's
//! mutations do. This crate is just the scan loop that ties the two
//! together on a timer.

pub mod error;
pub mod heartbeat;
pub mod reaper;

pub use error::QueueError;
pub use heartbeat::next_deadline;
pub use reaper::{Reaper, ReaperConfig};
