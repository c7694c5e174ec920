use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks are scoped to the Postgres session, so the guard holds on to the
// connection that took the lock and unlocks on that same connection.
const ETL_LOCK_KEY: i64 = 0x4649_4E42_4F41; // "FINBOA"

pub struct EtlRunLock {
    conn: PoolConnection<Postgres>,
}

/// `Ok(None)` when another invocation already holds the lock.
pub async fn try_acquire_etl_lock(pool: &sqlx::PgPool) -> anyhow::Result<Option<EtlRunLock>> {
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for ETL lock")?;

    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(ETL_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={ETL_LOCK_KEY})"))?;

    Ok(acquired.0.then_some(EtlRunLock { conn }))
}

impl EtlRunLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(ETL_LOCK_KEY)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={ETL_LOCK_KEY})"))?;
        Ok(())
    }
}
