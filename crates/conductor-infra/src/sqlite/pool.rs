//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time, so writes go through a
//! single-connection pool while reads share a small multi-connection pool.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Environment variable selecting the data directory.
pub const DATA_DIR_ENV: &str = "CONDUCTOR_DATA_DIR";

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: up to 8 connections for SELECT queries.
/// - `writer`: one connection for INSERT/UPDATE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools and run the embedded migrations on the writer.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await?;

        // Migrate before any reader opens so readers see the schema.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(base_opts.read_only(true))
            .await?;

        tracing::debug!(url = %database_url, "sqlite pools ready");
        Ok(Self { reader, writer })
    }
}

/// Data directory from `CONDUCTOR_DATA_DIR`, falling back to `~/.conductor`.
pub fn default_data_dir() -> String {
    std::env::var(DATA_DIR_ENV).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.conductor")
    })
}
