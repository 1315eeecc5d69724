use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::VoiceError;

/// Default provider base URL (OpenAI-compatible REST API).
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_speech_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_speed() -> f32 {
    1.2
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Connection settings for the speech-to-text, chat and text-to-speech
/// providers. All three share one base URL and API key.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_speech_model")]
    pub speech_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Speaking speed passed to the synthesis provider (0.25 to 4.0).
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Bound on every adapter call. For streams this is the idle time allowed
    /// between two items.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            transcription_model: default_transcription_model(),
            chat_model: default_chat_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
            speed: default_speed(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &"[REDACTED]")
            .field("transcription_model", &self.transcription_model)
            .field("chat_model", &self.chat_model)
            .field("speech_model", &self.speech_model)
            .field("voice", &self.voice)
            .field("speed", &self.speed)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Joins `path` onto the configured base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.api_base.trim().is_empty() {
            return Err(VoiceError::Config("api_base must not be empty".to_string()));
        }
        if !(0.25..=4.0).contains(&self.speed) {
            return Err(VoiceError::Config(format!(
                "speed must be between 0.25 and 4.0, got {}",
                self.speed
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(VoiceError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
