use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cadence_types::ChatMessage;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;

use crate::chat::{ChatCompleter, OpenAiChat, TextStream};
use crate::config::ProviderConfig;
use crate::error::VoiceError;
use crate::http;
use crate::stt::{Transcriber, WhisperTranscriber};
use crate::tts::{AudioStream, OpenAiSpeech, Synthesizer};

/// The three adapters the voice pipeline needs, behind one handle.
///
/// Cheap to clone. Every call is bounded by the configured timeout; streams
/// are bounded per item, so a long reply is fine as long as it keeps moving.
#[derive(Clone)]
pub struct VoiceServices {
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatCompleter>,
    synthesizer: Arc<dyn Synthesizer>,
    timeout: Duration,
}

impl std::fmt::Debug for VoiceServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceServices")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl VoiceServices {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatCompleter>,
        synthesizer: Arc<dyn Synthesizer>,
        timeout: Duration,
    ) -> Self {
        Self {
            transcriber,
            chat,
            synthesizer,
            timeout,
        }
    }

    /// Builds the HTTP-backed adapters from provider settings.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        let client = http::build_client(config)?;
        Ok(Self::new(
            Arc::new(WhisperTranscriber::new(client.clone(), config)),
            Arc::new(OpenAiChat::new(client.clone(), config)),
            Arc::new(OpenAiSpeech::new(client, config)),
            config.request_timeout(),
        ))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError> {
        self.bounded("transcription", self.transcriber.transcribe(audio))
            .await
    }

    pub async fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TextStream, VoiceError> {
        let fragments = self
            .bounded("chat", self.chat.stream_reply(messages))
            .await?;
        Ok(with_idle_timeout(fragments, "chat", self.timeout))
    }

    /// Collects a whole reply, with the same per-fragment bound as
    /// [`VoiceServices::stream_reply`].
    pub async fn reply(&self, messages: &[ChatMessage]) -> Result<String, VoiceError> {
        let mut fragments = self.stream_reply(messages).await?;
        let mut reply = String::new();
        while let Some(fragment) = fragments.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }

    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        self.bounded("synthesis", self.synthesizer.synthesize(text))
            .await
    }

    pub async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let chunks = self
            .bounded("synthesis", self.synthesizer.synthesize_stream(text))
            .await?;
        Ok(with_idle_timeout(chunks, "synthesis", self.timeout))
    }

    async fn bounded<T>(
        &self,
        stage: &'static str,
        call: impl Future<Output = Result<T, VoiceError>>,
    ) -> Result<T, VoiceError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!(stage, error = %e, "adapter call failed");
                }
                result
            }
            Err(_) => {
                tracing::warn!(stage, secs = self.timeout.as_secs(), "adapter call timed out");
                Err(VoiceError::Timeout {
                    stage,
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Ends `inner` with a `Timeout` error if no item arrives within `limit`.
fn with_idle_timeout<T: Send + 'static>(
    inner: BoxStream<'static, Result<T, VoiceError>>,
    stage: &'static str,
    limit: Duration,
) -> BoxStream<'static, Result<T, VoiceError>> {
    stream::unfold(Some(inner), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout(limit, inner.next()).await {
            Ok(Some(item)) => Some((item, Some(inner))),
            Ok(None) => None,
            Err(_) => {
                tracing::warn!(stage, secs = limit.as_secs(), "adapter stream stalled");
                Some((
                    Err(VoiceError::Timeout {
                        stage,
                        secs: limit.as_secs(),
                    }),
                    None,
                ))
            }
        }
    })
    .boxed()
}
