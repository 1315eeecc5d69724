use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use serde::Serialize;

use crate::config::ProviderConfig;
use crate::error::VoiceError;
use crate::http;

/// Maximum text input size for a single synthesis call, in characters.
pub const MAX_SYNTHESIS_INPUT_CHARS: usize = 4096;

/// MIME type of the audio produced by [`OpenAiSpeech`].
pub const SPEECH_CONTENT_TYPE: &str = "audio/mpeg";

/// A lazy sequence of encoded audio byte chunks.
pub type AudioStream = BoxStream<'static, Result<Bytes, VoiceError>>;

/// Text-to-speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesizes `text` and returns the complete encoded audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;

    /// Streaming variant: audio chunks are yielded as the provider sends them.
    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

/// Synthesizer backed by an OpenAI-compatible `/audio/speech` endpoint.
/// Produces MP3.
#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
}

impl OpenAiSpeech {
    pub fn new(client: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            url: config.endpoint("audio/speech"),
            api_key: config.api_key.clone(),
            model: config.speech_model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
        }
    }

    async fn request(&self, text: &str) -> Result<reqwest::Response, VoiceError> {
        let chars = text.chars().count();
        if chars > MAX_SYNTHESIS_INPUT_CHARS {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} characters (limit: {} characters)",
                chars, MAX_SYNTHESIS_INPUT_CHARS
            )));
        }
        if text.trim().is_empty() {
            return Err(VoiceError::Synthesis("text is empty".to_string()));
        }

        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VoiceError::Synthesis(http::describe_failure(response).await));
        }
        Ok(response)
    }
}

#[async_trait]
impl Synthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let response = self.request(text).await?;
        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read audio: {}", e)))?;
        tracing::debug!(chars = text.len(), bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }

    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let response = self.request(text).await?;
        Ok(response
            .bytes_stream()
            .map_err(|e| VoiceError::Synthesis(format!("audio stream failed: {}", e)))
            .try_filter(|chunk| futures_util::future::ready(!chunk.is_empty()))
            .boxed())
    }
}
