//! Shared harness: a real server on an ephemeral port, backed by a temp
//! SQLite database and scripted voice adapters.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cadence_server::auth::JwtAuthenticator;
use cadence_server::config::{AgentConfig, AuthConfig};
use cadence_server::registry::ConnectionRegistry;
use cadence_server::transcript_log::SqliteTranscriptLog;
use cadence_server::{app, AppState};
use cadence_types::ChatMessage;
use cadence_voice::{
    AudioStream, ChatCompleter, Synthesizer, TextStream, Transcriber, VoiceError, VoiceServices,
};
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const SECRET: &str = "integration-secret";
pub const LEARNER: &str = "learner@example.com";
pub const ADMIN: &str = "admin@example.com";
pub const VIEWER: &str = "viewer@example.com";
pub const RETIRED: &str = "retired@example.com";

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Returns the same text for every call and counts calls.
pub struct ScriptedTranscriber {
    pub text: String,
    pub calls: AtomicUsize,
    pub audio_lengths: Mutex<Vec<usize>>,
    pub fail: bool,
    pub delay: Duration,
}

impl ScriptedTranscriber {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            audio_lengths: Mutex::new(Vec::new()),
            fail: false,
            delay: Duration::ZERO,
        })
    }

    /// Takes `ms` milliseconds per call, long enough to back turns up.
    pub fn slow(text: &str, ms: u64) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            audio_lengths: Mutex::new(Vec::new()),
            fail: false,
            delay: Duration::from_millis(ms),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: String::new(),
            calls: AtomicUsize::new(0),
            audio_lengths: Mutex::new(Vec::new()),
            fail: true,
            delay: Duration::ZERO,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.audio_lengths.lock().unwrap().push(audio.len());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(VoiceError::Transcription("provider unavailable".into()));
        }
        Ok(self.text.clone())
    }
}

/// One scripted reply: fragments, optionally ending in a failure.
#[derive(Clone)]
pub struct Reply {
    pub fragments: Vec<&'static str>,
    pub fail_after: bool,
}

impl Reply {
    pub fn ok(fragments: &[&'static str]) -> Self {
        Self {
            fragments: fragments.to_vec(),
            fail_after: false,
        }
    }

    pub fn broken(fragments: &[&'static str]) -> Self {
        Self {
            fragments: fragments.to_vec(),
            fail_after: true,
        }
    }
}

/// Plays replies in order; the last one repeats. Records every prompt.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Reply>>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompleter for ScriptedChat {
    async fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TextStream, VoiceError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        }
        .unwrap_or_else(|| Reply::ok(&[]));

        let mut items: Vec<Result<String, VoiceError>> = reply
            .fragments
            .iter()
            .map(|f| Ok(f.to_string()))
            .collect();
        if reply.fail_after {
            items.push(Err(VoiceError::Chat("stream interrupted".into())));
        }
        Ok(stream::iter(items).boxed())
    }
}

/// Echoes the text as audio bytes, after a per-text delay.
pub struct LabelSpeech {
    delays: HashMap<&'static str, u64>,
    failing: Vec<&'static str>,
}

impl LabelSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delays: HashMap::new(),
            failing: Vec::new(),
        })
    }

    /// Fails to synthesize exactly the given texts.
    pub fn failing_on(texts: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            delays: HashMap::new(),
            failing: texts.to_vec(),
        })
    }

    pub fn with_delays(delays: &[(&'static str, u64)]) -> Arc<Self> {
        Arc::new(Self {
            delays: delays.iter().copied().collect(),
            failing: Vec::new(),
        })
    }
}

#[async_trait]
impl Synthesizer for LabelSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if let Some(ms) = self.delays.get(text) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.failing.iter().any(|f| *f == text) {
            return Err(VoiceError::Synthesis("voice unavailable".into()));
        }
        Ok(text.as_bytes().to_vec())
    }

    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        let chunks: Vec<Result<Bytes, VoiceError>> = text
            .as_bytes()
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

pub fn voice(
    transcriber: Arc<ScriptedTranscriber>,
    chat: Arc<ScriptedChat>,
    speech: Arc<LabelSpeech>,
) -> VoiceServices {
    VoiceServices::new(transcriber, chat, speech, Duration::from_secs(5))
}

/// Agent settings with partial passes effectively off.
pub fn quiet_agent() -> AgentConfig {
    AgentConfig {
        partial_min_chunks: 1_000,
        ..AgentConfig::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub user_ids: HashMap<&'static str, String>,
    _dir: tempfile::TempDir,
}

/// Builds state over a fresh database with one user per role class.
pub fn test_state(
    voice: VoiceServices,
    agent: AgentConfig,
) -> (AppState, HashMap<&'static str, String>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.db");
    let pool =
        cadence_db::create_pool(path.to_str().unwrap(), cadence_db::DbRuntimeSettings::default())
            .unwrap();

    let mut user_ids = HashMap::new();
    {
        let conn = pool.get().unwrap();
        cadence_db::run_migrations(&conn).unwrap();
        for (email, role) in [
            (LEARNER, "Formé"),
            (ADMIN, "SuperAdmin"),
            (VIEWER, "Viewer"),
            (RETIRED, "Formé"),
        ] {
            let user = cadence_db::create_user(&conn, email, &[role.to_string()]).unwrap();
            user_ids.insert(email, user.id);
        }
        cadence_db::deactivate_user(&conn, RETIRED).unwrap();
    }

    let auth = AuthConfig {
        secret: SECRET.to_string(),
        handshake_timeout_secs: 2,
        ..AuthConfig::default()
    };

    let state = AppState {
        authenticator: JwtAuthenticator::new(&auth.secret, auth.token_ttl_secs),
        auth: Arc::new(auth),
        agent: Arc::new(agent),
        voice,
        transcripts: Arc::new(SqliteTranscriptLog::new(pool.clone())),
        registry: ConnectionRegistry::new(),
        pool,
    };
    (state, user_ids, dir)
}

pub async fn spawn_server(voice: VoiceServices, agent: AgentConfig) -> TestServer {
    let (state, user_ids, dir) = test_state(voice, agent);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        user_ids,
        _dir: dir,
    }
}

impl TestServer {
    pub fn token(&self, email: &str) -> String {
        self.state.authenticator.issue_token(email).unwrap()
    }

    pub fn user_id(&self, email: &str) -> String {
        self.user_ids[email].clone()
    }

    pub async fn open(&self) -> Ws {
        let (ws, _) = connect_async(format!("ws://{}/ws/voice", self.addr))
            .await
            .expect("failed to connect");
        ws
    }

    /// Opens a socket, authenticates and consumes the `connected` frame.
    pub async fn connect(&self, email: &str) -> Ws {
        let mut ws = self.open().await;
        send_json(&mut ws, serde_json::json!({ "token": self.token(email) })).await;
        match next_frame(&mut ws).await {
            Frame::Event(event) => {
                assert_eq!(event["status"], "connected", "unexpected first frame: {}", event);
                assert_eq!(event["user_id"], self.user_id(email));
            }
            other => panic!("expected connected, got {:?}", other),
        }
        ws
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(Value),
    Audio(Vec<u8>),
    Closed(Option<(CloseCode, String)>),
}

impl Frame {
    pub fn status(&self) -> Option<&str> {
        match self {
            Frame::Event(event) => event["status"].as_str(),
            _ => None,
        }
    }
}

pub async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

pub async fn send_audio(ws: &mut Ws, chunk: &[u8]) {
    ws.send(Message::Binary(Bytes::copy_from_slice(chunk)))
        .await
        .unwrap();
}

pub async fn end_audio(ws: &mut Ws) {
    send_json(ws, serde_json::json!({ "command": "end_audio" })).await;
}

/// Next text, binary or close frame, within five seconds.
pub async fn next_frame(ws: &mut Ws) -> Frame {
    try_next_frame(ws, Duration::from_secs(5))
        .await
        .expect("timed out waiting for a frame")
}

pub async fn try_next_frame(ws: &mut Ws, wait: Duration) -> Option<Frame> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return None,
            Ok(None) => return Some(Frame::Closed(None)),
            Ok(Some(Err(_))) => return Some(Frame::Closed(None)),
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Text(text) => {
                return Some(Frame::Event(serde_json::from_str(text.as_str()).unwrap()))
            }
            Message::Binary(data) => return Some(Frame::Audio(data.to_vec())),
            Message::Close(frame) => {
                return Some(Frame::Closed(
                    frame.map(|f| (f.code, f.reason.as_str().to_string())),
                ))
            }
            _ => continue,
        }
    }
}

/// Collects frames up to and including the first with `status`.
pub async fn frames_until(ws: &mut Ws, status: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(ws).await;
        if let Frame::Closed(_) = frame {
            panic!("socket closed before {:?}; got {:?}", status, frames);
        }
        let done = frame.status() == Some(status);
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

/// Collects whatever arrives within `wait`.
pub async fn drain(ws: &mut Ws, wait: Duration) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = try_next_frame(ws, wait).await {
        let closed = matches!(frame, Frame::Closed(_));
        frames.push(frame);
        if closed {
            break;
        }
    }
    frames
}

pub fn count_status(frames: &[Frame], status: &str) -> usize {
    frames.iter().filter(|f| f.status() == Some(status)).count()
}

pub fn audio(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Audio(data) => Some(String::from_utf8(data.clone()).unwrap()),
            _ => None,
        })
        .collect()
}
