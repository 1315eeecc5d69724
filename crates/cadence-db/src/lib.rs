//! Database layer for the Cadence platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), embedded SQL migrations,
//! and the two record stores the voice agent needs: user lookup for token
//! resolution and the append-only transcript log.
//!
//! All functions take a plain `rusqlite::Connection` and are blocking; async
//! callers run them on `tokio::task::spawn_blocking`.

mod migrations;
mod pool;
pub mod transcripts;
pub mod users;

use thiserror::Error;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use transcripts::{
    append_transcript, list_transcripts_by_session, NewTranscript, DEFAULT_SESSION_ID,
};
pub use users::{create_user, deactivate_user, get_user_by_email, UserRecord};

/// Errors raised by the record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
