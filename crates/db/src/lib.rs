//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, typed row structs, hash canonicalization, and
//! repository functions for every table in the jobmon schema. No business
//! logic lives here — status transitions, cascades, and scheduling all live
//! in the `engine` crate; this crate only knows how to read and write rows.

pub mod error;
pub mod hash;
pub mod pool;
pub mod repository;
pub mod models;

pub use error::DbError;
pub use pool::DbPool;

/// The database server's own clock — the sole clock authority for heartbeat
/// leases and incremental status diffs.
pub async fn server_now(pool: &DbPool) -> Result<chrono::DateTime<chrono::Utc>, DbError> {
    let (now,): (chrono::DateTime<chrono::Utc>,) = sqlx::query_as("SELECT now()").fetch_one(pool).await?;
    Ok(now)
}
