//! Append-only transcript log.
//!
//! Every finalized transcription is written here, including empty ones.
//! Rows are never updated or deleted by the voice pipeline.

use cadence_types::TranscriptRecord;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};

use crate::StoreError;

/// Session id used when a caller has no session of its own.
pub const DEFAULT_SESSION_ID: &str = "default_session";

/// Parameters for appending a transcript.
#[derive(Debug, Clone)]
pub struct NewTranscript<'a> {
    pub session_id: &'a str,
    pub user_id: &'a str,
    pub text: &'a str,
}

/// Appends a transcript row and returns the stored record.
///
/// The id is a fresh UUID v4 and the timestamp is the current UTC time in
/// RFC 3339 with microsecond precision, so rows sort lexically by time.
pub fn append_transcript(
    conn: &Connection,
    params: &NewTranscript<'_>,
) -> Result<TranscriptRecord, StoreError> {
    let session_id = if params.session_id.is_empty() {
        DEFAULT_SESSION_ID
    } else {
        params.session_id
    };

    let record = TranscriptRecord {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        user_id: params.user_id.to_string(),
        text: params.text.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    };

    conn.execute(
        "INSERT INTO transcripts (id, session_id, user_id, text, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id,
            record.session_id,
            record.user_id,
            record.text,
            record.timestamp
        ],
    )?;

    Ok(record)
}

/// Lists all transcripts of a session, oldest first.
pub fn list_transcripts_by_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<TranscriptRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, user_id, text, timestamp
         FROM transcripts
         WHERE session_id = ?1
         ORDER BY timestamp ASC, rowid ASC",
    )?;

    let rows = stmt.query_map([session_id], |row| {
        Ok(TranscriptRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            text: row.get(3)?,
            timestamp: row.get(4)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}
