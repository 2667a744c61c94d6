//! Singleton lease for the Reaper: "the Reaper is a
//! singleton (enforced by a DB lease row)". Acquisition is a
//! compare-and-swap via `UPDATE ... RETURNING`, the same idiom the job
//! queue uses for `SELECT ... FOR UPDATE SKIP LOCKED`-style dequeue.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{models::ReaperLeaseRow, DbError};

/// Attempt to acquire (or renew) the reaper lease for `holder`. Succeeds if
/// no one holds the lease, the existing lease has expired, or `holder`
/// already holds it (idempotent renewal).
pub async fn try_acquire(
    pool: &PgPool,
    holder: &str,
    expires_at: DateTime<Utc>,
) -> Result<Option<ReaperLeaseRow>, DbError> {
    let row = sqlx::query_as::<_, ReaperLeaseRow>(
        r#"
        UPDATE reaper_lease
        SET holder = $1, expires_at = $2
        WHERE id = 1
          AND (holder IS NULL OR expires_at < now() OR holder = $1)
        RETURNING id, holder, expires_at
        "#,
    )
    .bind(holder)
    .bind(expires_at)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn release(pool: &PgPool, holder: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE reaper_lease SET holder = NULL, expires_at = NULL WHERE id = 1 AND holder = $1")
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}
