//! Connection registry: client id to live socket channel.

use axum::extract::ws::Message;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// How long a send may wait on a full connection queue before the frame is
/// dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Type alias for the connection map to satisfy clippy complexity checks.
type ConnectionMap = HashMap<String, (Uuid, mpsc::Sender<Message>)>;

/// Maps each authenticated client id to the outbound queue of its socket.
///
/// At most one entry exists per client id. Sends to an absent client are
/// no-ops, so background work may safely outlive its connection.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<ConnectionMap>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` for `client_id`, replacing any existing entry.
    ///
    /// A replaced channel is left open; closing it is up to its owner.
    /// Returns the session id of the new entry.
    pub async fn register(&self, client_id: String, sender: mpsc::Sender<Message>) -> Uuid {
        let session_id = Uuid::new_v4();
        let previous = self
            .connections
            .write()
            .await
            .insert(client_id.clone(), (session_id, sender));

        if let Some((old_session, _)) = previous {
            tracing::info!(
                client_id = %client_id,
                old_session = %old_session,
                new_session = %session_id,
                "replaced existing voice connection"
            );
        }
        session_id
    }

    /// Removes the entry for `client_id`. Returns whether one existed.
    pub async fn unregister(&self, client_id: &str) -> bool {
        self.connections.write().await.remove(client_id).is_some()
    }

    /// Removes the entry for `client_id` only if it still belongs to
    /// `session_id`, so a closing socket cannot evict its replacement.
    pub async fn unregister_session(&self, client_id: &str, session_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(client_id) {
            Some((current, _)) if *current == session_id => {
                connections.remove(client_id);
                true
            }
            _ => false,
        }
    }

    pub async fn is_registered(&self, client_id: &str) -> bool {
        self.connections.read().await.contains_key(client_id)
    }

    /// Returns the session id currently registered for `client_id`.
    pub async fn session_id(&self, client_id: &str) -> Option<Uuid> {
        self.connections
            .read()
            .await
            .get(client_id)
            .map(|(session_id, _)| *session_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn send_text(&self, client_id: &str, payload: String) -> bool {
        self.send(client_id, Message::Text(payload.into())).await
    }

    pub async fn send_binary(&self, client_id: &str, payload: impl Into<Bytes>) -> bool {
        self.send(client_id, Message::Binary(payload.into())).await
    }

    /// Best-effort delivery to the current channel of `client_id`.
    ///
    /// The lock is released before waiting on the queue. Frames sent by one
    /// task arrive in the order that task sent them; frames from different
    /// tasks may interleave. Returns `false` if the frame was not queued.
    pub async fn send(&self, client_id: &str, message: Message) -> bool {
        let sender = {
            let connections = self.connections.read().await;
            match connections.get(client_id) {
                Some((_, sender)) => sender.clone(),
                None => return false,
            }
        };

        match sender.send_timeout(message, SEND_TIMEOUT).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    client_id = %client_id,
                    "dropping frame for closed or slow connection: {}",
                    e
                );
                false
            }
        }
    }
}
