use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks belong to the Postgres session, so the guard pins one pooled
// connection for its lifetime.
const LOCK_NAMESPACE: i64 = 0x5452_4144_4541;

pub const CONFIRMATION_SWEEP: &str = "cleanup-confirmations";

/// FNV-1a over the job name, folded into the namespace.
fn lock_key(job: &str) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in job.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    LOCK_NAMESPACE ^ (hash as i64)
}

/// Held job lock; call [`JobLock::release`] when done.
pub struct JobLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

/// Returns `None` when another process holds the lock for `job`.
pub async fn try_acquire_job_lock(pool: &sqlx::PgPool, job: &str) -> anyhow::Result<Option<JobLock>> {
    let key = lock_key(job);
    let mut conn = pool.acquire().await.context("acquire connection for advisory lock failed")?;
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (job={job}, key={key})"))?;
    Ok(acquired.0.then_some(JobLock { conn, key }))
}

impl JobLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(self.key)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={})", self.key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_and_distinct_per_job() {
        assert_eq!(lock_key(CONFIRMATION_SWEEP), lock_key("cleanup-confirmations"));
        assert_ne!(lock_key(CONFIRMATION_SWEEP), lock_key("reindex-session"));
    }
}
