//! Voice WebSocket endpoint.
//!
//! Protocol: the client's first text frame carries its bearer token (and
//! optionally prior history). After `connected`, binary frames are audio
//! chunks and text frames are control commands (`end_audio`, `reset`).
//! Unknown frames are ignored.

use crate::auth::{authenticate, AuthError};
use crate::orchestrator::Orchestrator;
use crate::protocol::{AuthFrame, ControlCommand, ServerEvent};
use crate::session::{SessionState, SharedSession};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use cadence_types::{parse_history, ChatMessage, Identity};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Outbound frames buffered per connection before senders wait.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// How long cleanup waits for queued frames to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Handler for `GET /ws/voice`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Why the handshake did not produce an identity.
enum HandshakeError {
    /// The client must be told and the socket closed with a policy code.
    Rejected(AuthError),
    /// The client went away first.
    Disconnected,
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (identity, history) = match handshake(&mut socket, &state).await {
        Ok(accepted) => accepted,
        Err(HandshakeError::Rejected(e)) => {
            tracing::warn!(error = %e, "voice socket rejected");
            reject(socket, &e).await;
            return;
        }
        Err(HandshakeError::Disconnected) => {
            tracing::debug!("voice socket closed during handshake");
            return;
        }
    };

    let client_id = identity.user_id.clone();
    let (mut sender, mut receiver) = socket.split();

    // Bounded so a slow client cannot grow memory without limit.
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);

    let session_id = state.registry.register(client_id.clone(), tx.clone()).await;
    tracing::info!(
        client_id = %client_id,
        session_id = %session_id,
        history_len = history.len(),
        "voice socket connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let shared = Arc::new(SharedSession::new(
        identity,
        session_id,
        history,
        state.agent.synthesis_concurrency,
    ));
    let orchestrator = Orchestrator::new(
        state.voice.clone(),
        state.registry.clone(),
        state.transcripts.clone(),
        state.agent.clone(),
        shared.clone(),
    );
    let (turns, _turn_worker) = orchestrator.spawn_turn_worker();
    let mut session = SessionState::new(shared);

    send_event(
        &tx,
        ServerEvent::Connected {
            user_id: client_id.clone(),
        },
    )
    .await;

    let mut transport_error = None;
    while let Some(frame) = receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                transport_error = Some(e.to_string());
                break;
            }
        };

        match msg {
            Message::Binary(chunk) => {
                on_audio_chunk(&state, &orchestrator, &mut session, &tx, chunk).await;
            }
            Message::Text(text) => match ControlCommand::parse(text.as_str()) {
                Some(ControlCommand::EndAudio) => {
                    if session.audio.is_empty() {
                        continue;
                    }
                    let audio = session.audio.take();
                    session.shared.clear_partial();
                    tracing::debug!(client_id = %client_id, bytes = audio.len(), "turn queued");
                    if !turns.submit(audio) {
                        send_event(
                            &tx,
                            ServerEvent::error("Too many turns in progress, please wait"),
                        )
                        .await;
                    }
                }
                Some(ControlCommand::Reset { reset_history }) => {
                    session.audio.clear();
                    session.shared.clear_partial();
                    if reset_history {
                        session.shared.clear_history().await;
                    }
                    tracing::debug!(client_id = %client_id, reset_history, "session reset");
                    send_event(&tx, ServerEvent::Reset).await;
                }
                None => {
                    tracing::debug!(client_id = %client_id, "ignoring unrecognized text frame");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Queued turns keep running; their frames are dropped once we are gone.
    state.registry.unregister_session(&client_id, session_id).await;
    drop(turns);

    if let Some(error) = &transport_error {
        tracing::warn!(client_id = %client_id, "voice socket transport error: {}", error);
        let _ = tx.try_send(Message::Text(
            ServerEvent::error(error.as_str()).to_json().into(),
        ));
        let _ = tx.try_send(Message::Close(None));
    }
    drop(tx);

    let abort = send_task.abort_handle();
    if tokio::time::timeout(FLUSH_TIMEOUT, send_task).await.is_err() {
        abort.abort();
    }

    tracing::info!(
        client_id = %client_id,
        session_id = %session_id,
        "voice socket disconnected"
    );
}

/// Waits for the credential frame and resolves it to an allowed identity.
async fn handshake(
    socket: &mut WebSocket,
    state: &AppState,
) -> Result<(Identity, Vec<ChatMessage>), HandshakeError> {
    let frame = match tokio::time::timeout(state.auth.handshake_timeout(), read_auth_frame(socket))
        .await
    {
        Ok(result) => result?,
        Err(_) => return Err(HandshakeError::Rejected(AuthError::MissingToken)),
    };

    let token = frame
        .token
        .filter(|token| !token.trim().is_empty())
        .ok_or(HandshakeError::Rejected(AuthError::MissingToken))?;

    let identity = authenticate(
        &state.authenticator,
        &state.pool,
        &token,
        &state.auth.allowed_roles,
    )
    .await
    .map_err(HandshakeError::Rejected)?;

    let history = frame
        .history
        .as_ref()
        .map(parse_history)
        .unwrap_or_default();

    Ok((identity, history))
}

/// Reads frames until the first text frame and decodes it as an [`AuthFrame`].
/// A first frame of any other kind counts as a missing credential.
async fn read_auth_frame(socket: &mut WebSocket) -> Result<AuthFrame, HandshakeError> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str::<AuthFrame>(text.as_str())
                    .map_err(|_| HandshakeError::Rejected(AuthError::MissingToken));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => {
                return Err(HandshakeError::Rejected(AuthError::MissingToken))
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                return Err(HandshakeError::Disconnected)
            }
        }
    }
}

/// Sends the error frame, then closes with the policy-violation code.
async fn reject(mut socket: WebSocket, error: &AuthError) {
    let message = error.client_message();
    if let Err(e) = socket
        .send(Message::Text(ServerEvent::error(message).to_json().into()))
        .await
    {
        tracing::debug!("failed to send rejection to client: {}", e);
        return;
    }
    if let Err(e) = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: message.into(),
        })))
        .await
    {
        tracing::debug!("failed to close rejected socket: {}", e);
    }
}

async fn on_audio_chunk(
    state: &AppState,
    orchestrator: &Orchestrator,
    session: &mut SessionState,
    tx: &mpsc::Sender<Message>,
    chunk: Bytes,
) {
    let size = chunk.len();
    if session.audio.total_bytes() + size > state.agent.max_audio_bytes {
        tracing::warn!(
            client_id = %session.shared.client_id(),
            buffered = session.audio.total_bytes(),
            size,
            "audio chunk exceeds per-turn limit"
        );
        send_event(
            tx,
            ServerEvent::error(format!(
                "Audio exceeds the maximum of {} bytes per turn",
                state.agent.max_audio_bytes
            )),
        )
        .await;
        return;
    }

    let buffered = session.audio.push(chunk);
    send_event(tx, ServerEvent::ChunkReceived { size }).await;

    if buffered >= state.agent.partial_min_chunks {
        orchestrator.spawn_partial(session.audio.snapshot());
    }
}

async fn send_event(tx: &mpsc::Sender<Message>, event: ServerEvent) {
    if let Err(e) = tx.send(Message::Text(event.to_json().into())).await {
        tracing::warn!("failed to queue frame for client: {}", e);
    }
}
