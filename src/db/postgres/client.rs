use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

const SCHEMA_PATH: &str = "schema/postgres.sql";

/// Connection attempts before giving up at startup
const CONNECT_ATTEMPTS: u32 = 3;

/// PostgreSQL client with connection pooling.
///
/// Holds vehicles, toll transactions and the poller checkpoint. Writes that
/// race with the API layer rely on `ON CONFLICT` upserts, not on locks here.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

fn build_pool(settings: &PostgresSettings) -> anyhow::Result<Pool> {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&settings.host)
        .port(settings.port)
        .user(&settings.user)
        .password(&settings.password)
        .dbname(&settings.database);

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(mgr)
        .max_size(settings.pool_size)
        .build()
        .context("Failed to create PostgreSQL connection pool")
}

/// Delay before retry number `attempt` (200ms, 400ms, ...)
fn connect_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2_u64.pow(attempt))
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!(
            "Connecting to PostgreSQL at {}:{}/{}",
            settings.host, settings.port, settings.database
        );

        let pool = build_pool(&settings)?;

        let mut attempt = 1;
        loop {
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self { pool });
                },
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    let delay = connect_backoff(attempt);
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}: {}",
                        attempt, CONNECT_ATTEMPTS, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to connect to PostgreSQL after {} attempts",
                            CONNECT_ATTEMPTS
                        )
                    });
                },
            }
        }
    }

    /// Apply the schema. Every statement is idempotent, so this runs on each start.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");

        let schema = tokio::fs::read_to_string(SCHEMA_PATH)
            .await
            .with_context(|| format!("Failed to read {}", SCHEMA_PATH))?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.batch_execute(&schema)
            .await
            .context("Failed to apply PostgreSQL schema")?;
        tx.commit().await?;

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_backoff_doubles() {
        assert_eq!(connect_backoff(1), Duration::from_millis(200));
        assert_eq!(connect_backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let schema = std::fs::read_to_string(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/schema/postgres.sql"
        ))
        .unwrap();

        for line in schema.lines().map(str::trim) {
            if line.starts_with("CREATE TABLE") || line.starts_with("CREATE INDEX") {
                assert!(line.contains("IF NOT EXISTS"), "not idempotent: {}", line);
            }
        }
    }
}
