//! Wire frames of the voice socket.

use cadence_types::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First frame a client sends: its bearer token and optional prior history.
#[derive(Debug, Default, Deserialize)]
pub struct AuthFrame {
    #[serde(default)]
    pub token: Option<String>,
    /// Either a JSON-encoded string or an array of `{role, content}`.
    #[serde(default)]
    pub history: Option<Value>,
}

/// Text control frames sent by the client after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    EndAudio,
    Reset {
        #[serde(default)]
        reset_history: bool,
    },
}

impl ControlCommand {
    /// Parses a control frame. Unknown commands and malformed JSON yield
    /// `None` and are ignored by the caller.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Status frames sent to the client, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        user_id: String,
    },
    ChunkReceived {
        size: usize,
    },
    Transcribing,
    TranscriptionComplete {
        transcription: String,
    },
    PartialTranscription {
        transcription: String,
    },
    ProcessingParallel,
    EarlyProcessing,
    LlmChunk {
        chunk: String,
        text_so_far: String,
    },
    Complete {
        reply: String,
        history: Vec<ChatMessage>,
    },
    Reset,
    Error {
        error: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("failed to serialize server event: {}", e);
                r#"{"status":"error","error":"internal serialization error"}"#.to_string()
            }
        }
    }
}
