use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use cadence_types::ChatMessage;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::VoiceError;
use crate::http;

/// A finite, one-shot sequence of reply text fragments.
pub type TextStream = BoxStream<'static, Result<String, VoiceError>>;

/// Streaming chat completion.
///
/// The returned stream is not restartable; retrying means calling
/// [`ChatCompleter::stream_reply`] again.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TextStream, VoiceError>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

/// Incremental decoder for a server-sent-events chat completion body.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence; only
/// complete lines are decoded. Yields the non-empty `delta.content` strings
/// in order and stops at the `[DONE]` sentinel.
#[derive(Debug, Default)]
pub struct SseDeltaDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds raw body bytes and returns the content deltas completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, VoiceError> {
        self.buf.extend_from_slice(bytes);
        let mut deltas = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.decode_line(&line, &mut deltas)?;
            if self.done {
                self.buf.clear();
                break;
            }
        }
        Ok(deltas)
    }

    /// Decodes a trailing line left without a final newline.
    pub fn finish(&mut self) -> Result<Vec<String>, VoiceError> {
        let line = std::mem::take(&mut self.buf);
        let mut deltas = Vec::new();
        if !self.done {
            self.decode_line(&line, &mut deltas)?;
        }
        Ok(deltas)
    }

    fn decode_line(&mut self, raw: &[u8], out: &mut Vec<String>) -> Result<(), VoiceError> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| VoiceError::Chat(format!("invalid utf-8 in stream: {}", e)))?
            .trim();

        // Comments, `event:`/`id:` fields and blank separators carry no text.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: CompletionChunk = serde_json::from_str(data)
            .map_err(|e| VoiceError::Chat(format!("malformed stream event: {}", e)))?;
        if let Some(error) = chunk.error {
            return Err(VoiceError::Chat(error.message));
        }
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    out.push(content);
                }
            }
        }
        Ok(())
    }
}

/// Adapts a raw SSE byte stream into a [`TextStream`].
pub fn decode_sse_stream<S>(body: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    struct State {
        body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
        decoder: SseDeltaDecoder,
        pending: VecDeque<String>,
        finished: bool,
    }

    let state = State {
        body: body.boxed(),
        decoder: SseDeltaDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.finished {
                return None;
            }

            let decoded = match st.body.next().await {
                Some(Ok(bytes)) => st.decoder.push(&bytes),
                Some(Err(e)) => Err(VoiceError::Chat(format!("stream read failed: {}", e))),
                None => {
                    st.finished = true;
                    st.decoder.finish()
                }
            };

            match decoded {
                Ok(deltas) => {
                    st.pending.extend(deltas);
                    if st.decoder.is_done() {
                        st.finished = true;
                    }
                }
                Err(e) => {
                    st.finished = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
            }
        }
    })
    .boxed()
}

/// Chat completer backed by an OpenAI-compatible `/chat/completions`
/// endpoint with `stream: true`.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(client: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            url: config.endpoint("chat/completions"),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
        }
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TextStream, VoiceError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::Chat(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VoiceError::Chat(http::describe_failure(response).await));
        }

        tracing::debug!(messages = messages.len(), "chat stream opened");
        Ok(decode_sse_stream(response.bytes_stream()))
    }
}
