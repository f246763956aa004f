//! Session service database pool.
//!
//! One pool backs the account, session and audit stores. Connections are
//! short-lived per request; the audit writer shares the pool with the request
//! path, so the acquire timeout bounds how long a burst of audit writes can
//! hold up a sign-in.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Pool settings for the session stores, before connecting.
pub fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
}

/// Connect the pool shared by the account, session and audit stores.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting session store to PostgreSQL"
    );

    let pool = pool_options(config).connect(&config.url).await?;

    tracing::info!("Session store connected");
    Ok(pool)
}

/// Create the accounts, bootstrap marker, sessions and audit log tables.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running session store migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Session store migrations completed");
    Ok(())
}
