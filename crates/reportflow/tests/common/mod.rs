use reportflow::db;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connects to `TEST_DATABASE_URL`, applies the schema and empties both
/// tables. `None` when no test database is configured.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    db::apply_schema(&pool).await.expect("schema failed");

    sqlx::query("TRUNCATE TABLE queue_messages, report_jobs RESTART IDENTITY")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
