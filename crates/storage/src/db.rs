use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use binggo_core::config::StorageConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::StorageError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open (creating if needed) the SQLite database named by
/// `DATABASE_URL` and run migrations.
pub async fn init_pool(config: &StorageConfig) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?;
    let pool = connect(options, config.max_connections).await?;
    info!("SQLite connected: {}", config.database_url);
    Ok(pool)
}

/// Open a database file at `path`. Used by tests and tools that work on a
/// scratch database.
pub async fn init_pool_at(path: &Path, max_connections: u32) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::new().filename(path);
    let pool = connect(options, max_connections).await?;
    info!("SQLite connected: {}", path.display());
    Ok(pool)
}

async fn connect(
    options: SqliteConnectOptions,
    max_connections: u32,
) -> Result<SqlitePool, StorageError> {
    let options = options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}
