use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use warden_core::SystemClock;
use warden_infra::{ensure_schema, ExpirationSweeper, PostgresGrantStore, SweeperConfig, WardenConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_observability::init();

    let config = WardenConfig::from_env().context("invalid configuration")?;
    let database_url = config.require_database_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(config.store_timeout)
        .connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    ensure_schema(&pool).await.context("failed to prepare schema")?;

    let handle = ExpirationSweeper::new(PostgresGrantStore::new(pool))
        .with_clock(Arc::new(SystemClock))
        .with_store_timeout(config.store_timeout)
        .spawn(SweeperConfig::default().with_interval(config.sweep_interval));

    tracing::info!(interval_secs = config.sweep_interval.as_secs(), "warden-sweeper running");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!(stats = ?handle.stats(), "shutting down");
    handle.shutdown().await;

    Ok(())
}
