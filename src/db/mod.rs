//! Database module

pub mod queries;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Create the schedule table if it does not exist yet.
///
/// One row per calendar date; the whole schedule document lives in a JSONB
/// column so its shape can evolve without migrations.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedule_documents (
            schedule_date DATE PRIMARY KEY,
            revision BIGINT NOT NULL,
            document JSONB NOT NULL,
            saved_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    )
    .execute(pool)
    .await?;

    info!("Schedule table ready");
    Ok(())
}
