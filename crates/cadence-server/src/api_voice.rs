//! Request/response voice endpoints under `/voice-agent`.
//!
//! These are the non-streaming counterparts of the voice socket: one call
//! per stage, each behind the bearer-token middleware.

use crate::{api::ApiError, middleware::IdentityContext, AppState};
use axum::{
    body::Body,
    extract::{Extension, Multipart},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use cadence_db::DEFAULT_SESSION_ID;
use cadence_types::{build_prompt, parse_history, ChatMessage};
use cadence_voice::{MAX_SYNTHESIS_INPUT_CHARS, SPEECH_CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Ceiling for `POST /voice-agent/transcribe` request bodies.
pub const MAX_TRANSCRIBE_BODY_BYTES: usize = 26 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub transcription: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Prior turns, as an array or a JSON-encoded string.
    #[serde(default)]
    pub history: Value,
    pub user_text: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
}

/// Handler for `POST /voice-agent/transcribe`.
///
/// Expects the recording in a multipart field named `file`. The result is
/// also appended to the transcript log under the default session.
pub async fn transcribe_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(IdentityContext(identity)): Extension<IdentityContext>,
    mut multipart: Multipart,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;
        audio = Some(data);
        break;
    }

    let audio = audio.ok_or_else(|| ApiError::BadRequest("no file provided".to_string()))?;
    if audio.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }

    let transcription = state.voice.transcribe(&audio).await?;

    state
        .transcripts
        .append(DEFAULT_SESSION_ID, &identity.user_id, &transcription)
        .await?;

    tracing::info!(
        user_id = %identity.user_id,
        bytes = audio.len(),
        "transcribed uploaded audio"
    );

    Ok(Json(TranscribeResponse { transcription }))
}

/// Handler for `POST /voice-agent/chat`.
///
/// Returns the reply and the prior turns extended with the new exchange.
/// Nothing is stored server-side.
pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let mut history = parse_history(&payload.history);
    let prompt = build_prompt(state.agent.persona.as_deref(), &history, &payload.user_text);

    let reply = state.voice.reply(&prompt).await?;

    history.push(ChatMessage::user(payload.user_text));
    history.push(ChatMessage::assistant(reply.clone()));

    Ok(Json(ChatResponse { reply, history }))
}

/// Handler for `POST /voice-agent/tts-stream`.
///
/// Streams synthesized audio as it arrives from the provider. Errors before
/// the first byte map to an error status; later errors end the body early.
pub async fn tts_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SpeechRequest>,
) -> Result<Response, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    let chars = payload.text.chars().count();
    if chars > MAX_SYNTHESIS_INPUT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "text too long: {} characters (max {})",
            chars, MAX_SYNTHESIS_INPUT_CHARS
        )));
    }

    let audio = state.voice.synthesize_stream(&payload.text).await?;

    Ok((
        [
            (header::CONTENT_TYPE, SPEECH_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        Body::from_stream(audio),
    )
        .into_response())
}
