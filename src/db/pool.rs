//! SQLite connection pool.
//!
//! Change history is written in short transactions while evaluations read
//! concurrently, so the database runs in WAL mode with foreign keys enforced.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Pool shared by all commands of one server.
pub type DbPool = Pool<Sqlite>;

/// Open a pool on `db_path`, creating the file if needed.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file; its directory must exist
/// * `max_connections` - Upper bound of pooled connections
pub async fn create_pool(db_path: &Path, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Chain rebases hold the write lock for the whole chain.
        .busy_timeout(Duration::from_secs(30))
        .pragma("wal_autocheckpoint", "1000");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode").fetch_one(&pool).await?;
    if !mode.eq_ignore_ascii_case("wal") {
        log::warn!("SQLite journal mode is {} instead of wal", mode);
    }

    Ok(pool)
}
