use crate::error::Error;
use anyhow::Result;
use log::{error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub mod migrations;
pub mod models;
pub mod repositories;

/// Database service owning the ledger connection pool
pub struct DatabaseService {
    pub pool: Arc<SqlitePool>,
}

impl DatabaseService {
    /// Open (creating if missing) the ledger file and apply the schema
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening processed events ledger at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // a commit must survive a crash right after it returns
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        Self::connect(options).await
    }

    /// Private in-memory ledger
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Ledger(format!("Invalid in-memory database url: {}", e)))?;

        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // One connection: every ledger write is serialized through it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| Error::Ledger(format!("Failed to open ledger database: {}", e)))?;

        let service = Self {
            pool: Arc::new(pool),
        };
        service.run_migrations().await?;

        Ok(service)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| Error::Ledger(format!("Failed to run migrations: {}", e)))?;

        info!("Ledger schema is up to date");

        Ok(())
    }

    /// Health check for database
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&*self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("Ledger health check failed: {}", e);
                Ok(false)
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
