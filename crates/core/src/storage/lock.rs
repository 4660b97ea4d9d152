use crate::domain::Dimension;
use anyhow::Context;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// Advisory locks are scoped to the Postgres session. This is a best-effort
// guard against concurrent runs for the same client and dimension.
const LOCK_NAMESPACE: i64 = 0x4144_5749_5345; // "ADWISE" as hex-ish namespace.

fn lock_key(client_code: &str, dimension: Dimension) -> i64 {
    let mut hasher = DefaultHasher::new();
    client_code.hash(&mut hasher);
    dimension.slug().hash(&mut hasher);
    LOCK_NAMESPACE ^ (hasher.finish() as i64)
}

pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    client_code: &str,
    dimension: Dimension,
) -> anyhow::Result<bool> {
    let key = lock_key(client_code, dimension);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_run_lock(
    pool: &sqlx::PgPool,
    client_code: &str,
    dimension: Dimension,
) -> anyhow::Result<()> {
    let key = lock_key(client_code, dimension);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}
