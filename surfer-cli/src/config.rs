use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use surfer_core::{init_database, Database, RunStore, SqliteRunRepository, SurferConfig};

pub fn load_config() -> Result<SurferConfig> {
    SurferConfig::load().context(
        "Failed to load configuration.\n\
         Check surfer.toml, ~/.surfer/config.toml and SURFER_* environment variables",
    )
}

/// Opens the run database and runs pending migrations.
pub async fn open_database(config: &SurferConfig) -> Result<Database> {
    init_database(&config.database)
        .await
        .with_context(|| format!("Failed to open run database at {}", config.database.url))
}

pub fn run_repository(db: &Database) -> Arc<SqliteRunRepository> {
    Arc::new(SqliteRunRepository::new(db.pool().clone()))
}

/// A store over the persisted history, ready for reads.
pub async fn open_store(db: &Database) -> Result<Arc<RunStore>> {
    let store = Arc::new(RunStore::new(run_repository(db)));
    store.hydrate().await?;
    Ok(store)
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("surfer"))
}
