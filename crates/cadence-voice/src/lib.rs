//! Voice adapters for the Cadence platform.
//!
//! Wraps the three external AI providers the voice agent talks to:
//! speech-to-text ([`Transcriber`]), streaming chat completion
//! ([`ChatCompleter`]) and text-to-speech ([`Synthesizer`]). Each is a trait
//! so the server can be driven by scripted adapters in tests; the default
//! implementations speak the OpenAI-compatible REST API over `reqwest`.
//!
//! [`VoiceServices`] bundles one instance of each and applies the per-call
//! timeout, turning a stalled provider into [`VoiceError::Timeout`].

pub mod chat;
pub mod config;
pub mod error;
mod http;
pub mod service;
pub mod stt;
pub mod tts;

pub use chat::{ChatCompleter, OpenAiChat, SseDeltaDecoder, TextStream};
pub use config::ProviderConfig;
pub use error::VoiceError;
pub use service::VoiceServices;
pub use stt::{Transcriber, WhisperTranscriber, MAX_TRANSCRIPTION_INPUT_BYTES};
pub use tts::{
    AudioStream, OpenAiSpeech, Synthesizer, MAX_SYNTHESIS_INPUT_CHARS, SPEECH_CONTENT_TYPE,
};
