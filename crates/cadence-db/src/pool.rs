//! SQLite connection pool.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use thiserror::Error;

/// Connection settings taken from the `[database]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open database pool: {0}")]
    Open(#[from] r2d2::Error),
}

/// Opens a pool over the database file at `db_path`.
///
/// Transcript appends from background tasks and identity lookups from
/// request handlers hit the file concurrently, so every connection runs in
/// WAL mode with a busy timeout. `:memory:` gives each pooled connection its
/// own private database.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(move |conn| configure_connection(conn, settings));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;
    tracing::debug!(path = db_path, max_size = settings.pool_max_size, "database pool ready");
    Ok(pool)
}

fn configure_connection(conn: &mut Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        tracing::warn!(mode = %mode, "database did not switch to WAL journaling");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
}
