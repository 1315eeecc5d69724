use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::VoiceError;
use crate::http;

/// Maximum audio input size accepted by the transcription provider (25 MiB).
pub const MAX_TRANSCRIPTION_INPUT_BYTES: usize = 25 * 1024 * 1024;

/// Speech-to-text: raw audio bytes in, text out.
///
/// Implementations are stateless and may be retried freely.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Transcriber backed by an OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(client: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            url: config.endpoint("audio/transcriptions"),
            api_key: config.api_key.clone(),
            model: config.transcription_model.clone(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError> {
        if audio.len() > MAX_TRANSCRIPTION_INPUT_BYTES {
            return Err(VoiceError::Transcription(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_TRANSCRIPTION_INPUT_BYTES
            )));
        }

        // The provider sniffs the container from the bytes; the file name
        // only has to carry an extension it accepts.
        let file_part = Part::bytes(audio.to_vec())
            .file_name("audio.mp3")
            .mime_str("application/octet-stream")
            .map_err(|e| VoiceError::Transcription(format!("invalid mime type: {}", e)))?;

        let form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VoiceError::Transcription(
                http::describe_failure(response).await,
            ));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Transcription(format!("invalid response: {}", e)))?;

        tracing::debug!(bytes = audio.len(), chars = body.text.len(), "transcription complete");
        Ok(body.text)
    }
}
