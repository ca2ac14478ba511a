use crate::config::DatabaseConfig;
use crate::error::SurferResult;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> SurferResult<Self> {
        info!("Connecting to database...");

        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let filename = options.get_filename();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!(path = %parent.display(), "Creating database directory");
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_max_connections)
            .min_connections(config.pool_min_connections)
            .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout_secs))
            .connect_with(options)
            .await?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// A private in-memory database. The pool is pinned to a single
    /// connection that never expires, since every sqlite memory connection
    /// is its own database.
    pub async fn in_memory() -> SurferResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> SurferResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> SurferResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

pub async fn init_database(config: &DatabaseConfig) -> SurferResult<Database> {
    let db = Database::connect(config).await?;
    db.run_migrations().await?;
    Ok(db)
}

pub async fn init_memory_database() -> SurferResult<Database> {
    let db = Database::in_memory().await?;
    db.run_migrations().await?;
    Ok(db)
}
