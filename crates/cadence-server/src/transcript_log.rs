//! Transcript log seam used by the voice pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use cadence_db::{DbPool, NewTranscript, StoreError};
use cadence_types::TranscriptRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptLogError {
    #[error("transcript store error: {0}")]
    Store(#[from] StoreError),
    #[error("db connection failed: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("task join error: {0}")]
    Join(String),
}

/// Append-only store of finalized transcriptions.
#[async_trait]
pub trait TranscriptLog: Send + Sync {
    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<TranscriptRecord, TranscriptLogError>;

    async fn list_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TranscriptRecord>, TranscriptLogError>;
}

/// [`TranscriptLog`] backed by the SQLite pool.
#[derive(Clone)]
pub struct SqliteTranscriptLog {
    pool: DbPool,
}

impl SqliteTranscriptLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TranscriptLog for SqliteTranscriptLog {
    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<TranscriptRecord, TranscriptLogError> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        let user_id = user_id.to_string();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let record = cadence_db::append_transcript(
                &conn,
                &NewTranscript {
                    session_id: &session_id,
                    user_id: &user_id,
                    text: &text,
                },
            )?;
            Ok(record)
        })
        .await
        .map_err(|e| TranscriptLogError::Join(e.to_string()))?
    }

    async fn list_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TranscriptRecord>, TranscriptLogError> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            Ok(cadence_db::list_transcripts_by_session(&conn, &session_id)?)
        })
        .await
        .map_err(|e| TranscriptLogError::Join(e.to_string()))?
    }
}

/// Writes a transcript without making the caller wait. Failures are logged.
pub fn record_in_background(
    log: Arc<dyn TranscriptLog>,
    session_id: String,
    user_id: String,
    text: String,
) {
    tokio::spawn(async move {
        match log.append(&session_id, &user_id, &text).await {
            Ok(record) => tracing::debug!(
                session_id = %session_id,
                record_id = %record.id,
                "transcript recorded"
            ),
            Err(e) => tracing::error!(
                session_id = %session_id,
                user_id = %user_id,
                "failed to record transcript: {}",
                e
            ),
        }
    });
}
