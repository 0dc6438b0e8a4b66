use sqlx::{postgres::PgPoolOptions, Executor, PgPool};

use crate::config::DatabaseConfig;

const SCHEMA: &str = include_str!("../schema.sql");

pub async fn make_pool(cfg: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.pool_size)
        .acquire_timeout(cfg.acquire_timeout)
        .connect(&cfg.url)
        .await?;

    Ok(pool)
}

/// Round-trips a trivial query so a bad DSN fails at startup rather than on
/// the first job.
pub async fn ping(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Creates `report_jobs` and `queue_messages` if they do not exist yet.
pub async fn apply_schema(pool: &PgPool) -> anyhow::Result<()> {
    pool.execute(SCHEMA).await?;
    Ok(())
}
