use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("chat completion failed: {0}")]
    Chat(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("{stage} timed out after {secs} seconds")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl VoiceError {
    /// Names the adapter that produced the error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Transcription(_) => "transcription",
            Self::Chat(_) => "chat",
            Self::Synthesis(_) => "synthesis",
            Self::Timeout { stage, .. } => stage,
            Self::Config(_) => "config",
        }
    }
}
