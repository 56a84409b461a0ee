//! SQLite persistence for scan results and module progress.
//!
//! Every running link's collector writes through one shared pool, while
//! subdomain links read cross-task history from the same tables.

pub mod models;
pub mod repositories;

pub use repositories::{SqlxProgressRepository, SqlxResultRepository};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

/// SQLite admits one writer at a time; extra connections only serve history reads.
const MAX_CONNECTIONS: u32 = 4;

/// Collectors of concurrent tasks queue on the write lock for at most this long.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a pool of at most `max_connections`.
///
/// File databases run in WAL mode so history lookups don't block collector
/// writes. `sqlite::memory:` needs a single connection, otherwise every
/// connection sees its own empty database.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(BUSY_TIMEOUT)
        .connect_with(options)
        .await?;

    tracing::info!(url = %database_url, max_connections, "Database pool initialized");
    Ok(pool)
}

/// Open a pool sized for `database_url`.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        MAX_CONNECTIONS
    };
    init_pool_with_size(database_url, max_connections).await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::debug!("Database migrations applied");
    Ok(())
}
