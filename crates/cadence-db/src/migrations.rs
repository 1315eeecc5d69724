//! Versioned schema migrations.
//!
//! Each migration carries a version number and an embedded SQL file. The
//! highest applied version is kept in `_cadence_migrations`; on startup every
//! migration above it is applied in order, each inside a transaction together
//! with its ledger row.

use rusqlite::{params, Connection};
use thiserror::Error;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Versions must be strictly increasing.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users",
        sql: include_str!("migrations/0001_users.sql"),
    },
    Migration {
        version: 2,
        name: "transcripts",
        sql: include_str!("migrations/0002_transcripts.sql"),
    },
];

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS _cadence_migrations (
    version INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read or create the migration ledger: {0}")]
    Ledger(#[source] rusqlite::Error),

    #[error("migration {version} ({name}) failed: {source}")]
    Failed {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns how many migrations ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_pending(conn, MIGRATIONS)
}

fn apply_pending(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(LEDGER_DDL)
        .map_err(MigrationError::Ledger)?;
    let current = schema_version(conn)?;

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            migration = migration.name,
            "applying migration"
        );
        apply(conn, migration).map_err(|source| MigrationError::Failed {
            version: migration.version,
            name: migration.name,
            source,
        })?;
        applied += 1;
    }

    if applied == 0 {
        tracing::debug!(version = current, "schema up to date");
    }
    Ok(applied)
}

fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _cadence_migrations (version, name) VALUES (?1, ?2)",
        params![migration.version, migration.name],
    )?;
    tx.commit()
}

fn schema_version(conn: &Connection) -> Result<u32, MigrationError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _cadence_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(MigrationError::Ledger)
}
