//! Waits for the database, applies migrations and seeds the test user.

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenantry_db::{DatabaseConfig, PostgresDatabase, Querier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tenantry_db=info,tenantry_bootstrap=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = DatabaseConfig::from_env().context("Invalid database configuration")?;
    tracing::info!(
        max_connections = config.max_connections,
        id_strategy = %config.id_strategy,
        "Loaded database configuration"
    );

    // --- Database ---
    let pool = tenantry_db::create_pool(&config).context("Failed to create connection pool")?;
    let querier = Querier::new(PostgresDatabase::new(pool.clone()), config.querier_config());

    if !config.run_migrations {
        tracing::info!("Migrations disabled, checking readiness only");
        if !querier.is_ready(config.max_ping_attempts).await {
            anyhow::bail!(
                "database not ready after {} attempts",
                config.max_ping_attempts
            );
        }
        pool.close().await;
        return Ok(());
    }

    querier
        .migrate(config.max_ping_attempts, config.test_user.as_ref())
        .await
        .context("Failed to migrate database")?;
    tracing::info!("Database ready");

    pool.close().await;
    Ok(())
}
