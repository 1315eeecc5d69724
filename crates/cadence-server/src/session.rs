//! Per-connection working state.

use bytes::Bytes;
use cadence_types::{ChatMessage, Identity};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

/// Audio chunks received since the last flush, in arrival order.
#[derive(Debug, Default)]
pub struct AudioBuffer {
    chunks: Vec<Bytes>,
    total_bytes: usize,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the number of buffered chunks.
    pub fn push(&mut self, chunk: Bytes) -> usize {
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        self.chunks.len()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Copies the chunk list without consuming it. Chunks are shared, not
    /// duplicated.
    pub fn snapshot(&self) -> Vec<Bytes> {
        self.chunks.clone()
    }

    /// Empties the buffer and returns its contents joined into one block.
    pub fn take(&mut self) -> Vec<u8> {
        let joined = concat(&self.chunks);
        self.clear();
        joined
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }
}

/// Joins chunks into one contiguous block.
pub fn concat(chunks: &[Bytes]) -> Vec<u8> {
    let mut joined = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        joined.extend_from_slice(chunk);
    }
    joined
}

/// State shared between a connection's receive loop and its background tasks.
#[derive(Debug)]
pub struct SharedSession {
    pub identity: Identity,
    /// Registry session id; also the transcript log session id.
    pub session_id: Uuid,
    /// Committed user/assistant turns. Only finalized turns append here.
    pub history: Mutex<Vec<ChatMessage>>,
    /// Last partial transcription, used to skip duplicate early passes.
    last_partial: StdMutex<Option<String>>,
    /// Bounds concurrent synthesis calls for this connection.
    pub synthesis_permits: Arc<Semaphore>,
}

impl SharedSession {
    pub fn new(
        identity: Identity,
        session_id: Uuid,
        history: Vec<ChatMessage>,
        synthesis_concurrency: usize,
    ) -> Self {
        Self {
            identity,
            session_id,
            history: Mutex::new(history),
            last_partial: StdMutex::new(None),
            synthesis_permits: Arc::new(Semaphore::new(synthesis_concurrency.max(1))),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.identity.user_id
    }

    pub async fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    /// Appends one completed turn and returns the resulting history.
    pub async fn commit_turn(&self, user_text: &str, reply: &str) -> Vec<ChatMessage> {
        let mut history = self.history.lock().await;
        history.push(ChatMessage::user(user_text));
        history.push(ChatMessage::assistant(reply));
        history.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Records `text` as the latest partial transcription. Returns `false`
    /// if it equals the previous one.
    pub fn note_partial(&self, text: &str) -> bool {
        let mut last = self
            .last_partial
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.as_deref() == Some(text) {
            return false;
        }
        *last = Some(text.to_string());
        true
    }

    pub fn clear_partial(&self) {
        *self
            .last_partial
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Everything the receive loop owns for one connection.
#[derive(Debug)]
pub struct SessionState {
    pub audio: AudioBuffer,
    pub shared: Arc<SharedSession>,
}

impl SessionState {
    pub fn new(shared: Arc<SharedSession>) -> Self {
        Self {
            audio: AudioBuffer::new(),
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedSession {
        SharedSession::new(
            Identity {
                user_id: "u-1".to_string(),
                email: "u@example.com".to_string(),
                roles: vec![],
            },
            Uuid::new_v4(),
            vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")],
            2,
        )
    }

    #[test]
    fn buffer_take_joins_and_clears() {
        let mut buffer = AudioBuffer::new();
        assert_eq!(buffer.push(Bytes::from_static(b"ab")), 1);
        assert_eq!(buffer.push(Bytes::from_static(b"cde")), 2);
        assert_eq!(buffer.total_bytes(), 5);

        let snapshot = buffer.snapshot();
        assert_eq!(concat(&snapshot), b"abcde");
        assert_eq!(buffer.len(), 2, "snapshot must not consume");

        assert_eq!(buffer.take(), b"abcde");
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_bytes(), 0);
        assert!(buffer.take().is_empty());
    }

    #[tokio::test]
    async fn commit_appends_user_then_assistant() {
        let session = shared();
        let history = session.commit_turn("question", "answer").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], ChatMessage::user("question"));
        assert_eq!(history[3], ChatMessage::assistant("answer"));

        session.clear_history().await;
        assert!(session.history_snapshot().await.is_empty());
    }

    #[test]
    fn partial_dedupe_until_cleared() {
        let session = shared();
        assert!(session.note_partial("hello"));
        assert!(!session.note_partial("hello"));
        assert!(session.note_partial("hello there"));
        session.clear_partial();
        assert!(session.note_partial("hello there"));
    }

    #[test]
    fn zero_concurrency_still_allows_one_permit() {
        let session = SharedSession::new(
            Identity {
                user_id: "u".into(),
                email: "e".into(),
                roles: vec![],
            },
            Uuid::new_v4(),
            vec![],
            0,
        );
        assert_eq!(session.synthesis_permits.available_permits(), 1);
    }
}
