use anyhow::{bail, Context};
use phantom_core::config::PostgresConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Connect to the metadata database and apply migrations.
pub async fn init_pg_pool(config: &PostgresConfig) -> anyhow::Result<PgPool> {
    if !config.is_configured() {
        bail!("PG_USERNAME not configured, no metadata database to use");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
        .with_context(|| format!("failed to connect to PostgreSQL at {}", config.host))?;
    info!(host = %config.host, database = %config.database, "PostgreSQL connected");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("Database migrations applied successfully");

    Ok(pool)
}

/// Pool for the database SQL tasks query; no migrations are run there.
pub async fn connect_sql_target(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to the SQL target database")?;
    info!("SQL target database connected");
    Ok(pool)
}
