//! Database module for persistent storage of decoded Trixy events.
//!
//! This module provides SQLite-based storage for:
//! - The six event tables, one per event kind
//! - Per-contract sync progress (the durable cursor)
//! - A dead-letter table for events that failed to decode
//!
//! # Architecture
//!
//! - `models`: Data structures that map to database tables
//! - `repository`: Inserts, cursor bookkeeping and summaries
//! - Connection pooling with SQLite WAL mode
//! - Embedded migrations under `migrations/`

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{IndexerError, IndexerResult};

pub mod models;
pub mod repository;

pub use repository::{PersistOutcome, Repository};

/// Tables the schema must contain after migrations.
pub const REQUIRED_TABLES: [&str; 8] = [
    "flow_sync_states",
    "flow_market_createds",
    "flow_bet_placeds",
    "flow_market_resolveds",
    "flow_winnings_claimeds",
    "flow_yield_depositeds",
    "flow_yield_withdrawns",
    "flow_skipped_events",
];

/// Creates a SQLite connection pool and brings the schema up to date.
///
/// # Configuration
///
/// - **WAL mode**: concurrent readers during writes
/// - **Busy timeout**: 30 seconds to ride out lock contention
/// - **Max connections**: 5 on disk; in-memory databases get a single,
///   never-recycled connection since each connection would see its own database
///
/// # Example
///
/// ```no_run
/// use trixy_flow_indexer::db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("sqlite:./trixy-indexer.db").await?;
///     Ok(())
/// }
/// ```
pub async fn create_pool(database_url: &str) -> IndexerResult<SqlitePool> {
    info!(database_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to parse database URL: {database_url}"),
                Some(Box::new(e)),
            )
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(Option::<Duration>::None)
            .max_lifetime(Option::<Duration>::None)
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to connect to database at {database_url}"),
                Some(Box::new(e)),
            )
        })?;

    info!("Running database migrations");
    run_migrations(&pool).await?;
    verify_database(&pool).await?;
    info!("Database migrations complete");

    Ok(pool)
}

/// Applies pending migrations from `migrations/`. Safe to call repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> IndexerResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            IndexerError::database("Failed to run database migrations", Some(Box::new(e)))
        })?;

    Ok(())
}

/// Verify that required tables exist after migrations.
pub async fn verify_database(pool: &SqlitePool) -> IndexerResult<()> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'flow_%'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| IndexerError::database("Failed to verify database schema", Some(Box::new(e))))?;

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|table| !rows.iter().any(|(name,)| name == table))
        .collect();

    if !missing.is_empty() {
        return Err(IndexerError::database(
            format!("Database schema incomplete, missing tables: {}", missing.join(", ")),
            None,
        ));
    }

    Ok(())
}
