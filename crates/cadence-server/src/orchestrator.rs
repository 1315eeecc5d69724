//! Turn processing for the voice socket.
//!
//! A finished utterance (`end_audio`) becomes a turn: transcribe, stream the
//! assistant reply as text, voice it in fragments, then commit the exchange to
//! the conversation history. Turns of one connection run one at a time on a
//! dedicated worker. Partial passes run alongside and never touch history.
//!
//! All frames produced here go through the [`ConnectionRegistry`], so work
//! that outlives its connection degrades to no-op sends.

use std::sync::Arc;

use bytes::Bytes;
use cadence_types::{build_prompt, ChatMessage};
use cadence_voice::{VoiceError, VoiceServices};
use futures_util::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::AgentConfig;
use crate::protocol::ServerEvent;
use crate::registry::ConnectionRegistry;
use crate::session::{concat, SharedSession};
use crate::transcript_log::{record_in_background, TranscriptLog};

/// Turns that may wait behind the running one before `end_audio` is refused.
pub const MAX_PENDING_TURNS: usize = 4;

/// Characters that make a fragment worth voicing right away.
const STRONG_PUNCTUATION: [char; 4] = ['.', ',', '!', '?'];

/// Thresholds deciding when buffered reply text is sent to synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    pub first_tier_fragments: usize,
    pub first_tier_min_chars: usize,
    pub later_min_chars: usize,
}

impl From<&AgentConfig> for TriggerPolicy {
    fn from(agent: &AgentConfig) -> Self {
        Self {
            first_tier_fragments: agent.first_tier_fragments,
            first_tier_min_chars: agent.first_tier_min_chars,
            later_min_chars: agent.later_min_chars,
        }
    }
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// Groups streamed reply fragments into synthesis units.
///
/// Fragments accumulate until the pending text reaches the current
/// threshold or a fragment carries strong punctuation. The first
/// `first_tier_fragments` fragments use the low threshold so the reply
/// starts speaking sooner.
#[derive(Debug)]
pub struct SynthesisTrigger {
    policy: TriggerPolicy,
    fragments_seen: usize,
    pending: String,
}

impl SynthesisTrigger {
    pub fn new(policy: TriggerPolicy) -> Self {
        Self {
            policy,
            fragments_seen: 0,
            pending: String::new(),
        }
    }

    /// Adds a fragment. Returns the text to synthesize if the trigger fired.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.fragments_seen += 1;
        self.pending.push_str(fragment);

        let threshold = if self.fragments_seen <= self.policy.first_tier_fragments {
            self.policy.first_tier_min_chars
        } else {
            self.policy.later_min_chars
        };
        let punctuated = fragment.contains(&STRONG_PUNCTUATION[..]);

        if !punctuated && self.pending.chars().count() < threshold {
            return None;
        }
        if self.pending.trim().is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Returns whatever text never reached a trigger.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }
}

/// Outcome of one fully streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub text: String,
    pub fragments: usize,
    pub audio_frames: usize,
}

type SynthesisTask = JoinHandle<Result<Vec<u8>, VoiceError>>;

/// Synthesizes reply fragments concurrently and emits their audio in
/// dispatch order.
///
/// Each dispatched fragment runs on its own task under the connection's
/// synthesis permits. A single emitter awaits the tasks in order and sends
/// the audio, so a fast late fragment never overtakes a slow early one.
/// The first failure stops emission.
pub struct OrderedSynthesis {
    services: VoiceServices,
    permits: Arc<Semaphore>,
    queue: Option<mpsc::UnboundedSender<SynthesisTask>>,
    emitter: JoinHandle<Result<usize, VoiceError>>,
    in_flight: Vec<AbortHandle>,
}

impl OrderedSynthesis {
    pub fn start(
        services: VoiceServices,
        permits: Arc<Semaphore>,
        registry: ConnectionRegistry,
        client_id: String,
    ) -> Self {
        let (queue, mut tasks) = mpsc::unbounded_channel::<SynthesisTask>();

        let emitter = tokio::spawn(async move {
            let mut sent = 0;
            while let Some(task) = tasks.recv().await {
                let audio = match task.await {
                    Ok(result) => result?,
                    Err(e) => {
                        return Err(VoiceError::Synthesis(format!(
                            "synthesis task failed: {}",
                            e
                        )))
                    }
                };
                if registry.send_binary(&client_id, audio).await {
                    sent += 1;
                }
            }
            Ok(sent)
        });

        Self {
            services,
            permits,
            queue: Some(queue),
            emitter,
            in_flight: Vec::new(),
        }
    }

    pub fn dispatch(&mut self, text: String) {
        let services = self.services.clone();
        let permits = self.permits.clone();
        let task = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| VoiceError::Synthesis("synthesis permits closed".to_string()))?;
            services.synthesize(&text).await
        });
        self.in_flight.push(task.abort_handle());

        if let Some(queue) = &self.queue {
            // The emitter only goes away after a failure, which `finish` reports.
            let _ = queue.send(task);
        }
    }

    /// `true` once a dispatched synthesis has failed.
    pub fn has_failed(&self) -> bool {
        self.queue.is_some() && self.emitter.is_finished()
    }

    /// Waits for every dispatched fragment to be emitted. Returns the number
    /// of audio frames delivered.
    pub async fn finish(mut self) -> Result<usize, VoiceError> {
        self.queue = None;
        let result = match (&mut self.emitter).await {
            Ok(result) => result,
            Err(e) => Err(VoiceError::Synthesis(format!("audio emitter failed: {}", e))),
        };
        if result.is_err() {
            self.abort_in_flight();
        }
        result
    }

    pub fn abort(self) {
        self.abort_in_flight();
        self.emitter.abort();
    }

    fn abort_in_flight(&self) {
        for task in &self.in_flight {
            task.abort();
        }
    }
}

/// Runs turns and partial passes for one connection.
#[derive(Clone)]
pub struct Orchestrator {
    services: VoiceServices,
    registry: ConnectionRegistry,
    transcripts: Arc<dyn TranscriptLog>,
    agent: Arc<AgentConfig>,
    session: Arc<SharedSession>,
}

/// Sending side of a connection's turn worker.
#[derive(Clone)]
pub struct TurnQueue {
    tx: mpsc::Sender<Vec<u8>>,
}

impl TurnQueue {
    /// Queues a captured utterance. Returns `false` if the queue is full or
    /// the worker has stopped.
    pub fn submit(&self, audio: Vec<u8>) -> bool {
        match self.tx.try_send(audio) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("turn not queued: {}", e);
                false
            }
        }
    }
}

impl Orchestrator {
    pub fn new(
        services: VoiceServices,
        registry: ConnectionRegistry,
        transcripts: Arc<dyn TranscriptLog>,
        agent: Arc<AgentConfig>,
        session: Arc<SharedSession>,
    ) -> Self {
        Self {
            services,
            registry,
            transcripts,
            agent,
            session,
        }
    }

    /// Starts the worker that runs this connection's turns in order.
    ///
    /// The worker stops once every [`TurnQueue`] is dropped and the queued
    /// turns have run.
    pub fn spawn_turn_worker(&self) -> (TurnQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(MAX_PENDING_TURNS);
        let orchestrator = self.clone();

        let handle = tokio::spawn(async move {
            while let Some(audio) = rx.recv().await {
                orchestrator.finalize_turn(audio).await;
            }
            tracing::debug!(
                client_id = %orchestrator.session.client_id(),
                session_id = %orchestrator.session.session_id,
                "turn worker stopped"
            );
        });

        (TurnQueue { tx }, handle)
    }

    /// Runs a partial pass on a snapshot of in-progress audio.
    pub fn spawn_partial(&self, chunks: Vec<Bytes>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run_partial(chunks).await })
    }

    /// Processes one finished utterance end to end.
    ///
    /// History is committed only when the whole reply, including its audio,
    /// was delivered. Any adapter failure is reported as an error frame.
    pub async fn finalize_turn(&self, audio: Vec<u8>) {
        let client_id = self.session.client_id();
        self.send(ServerEvent::Transcribing).await;

        let user_text = match self.services.transcribe(&audio).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(client_id = %client_id, stage = e.stage(), "turn failed: {}", e);
                self.send(ServerEvent::error(e.to_string())).await;
                return;
            }
        };

        record_in_background(
            self.transcripts.clone(),
            self.session.session_id.to_string(),
            client_id.to_string(),
            user_text.clone(),
        );

        self.send(ServerEvent::TranscriptionComplete {
            transcription: user_text.clone(),
        })
        .await;

        let history = self.session.history_snapshot().await;
        let prompt = build_prompt(self.agent.persona.as_deref(), &history, &user_text);

        self.send(ServerEvent::ProcessingParallel).await;

        match self.stream_reply(&prompt).await {
            Ok(reply) => {
                let history = self.session.commit_turn(&user_text, &reply.text).await;
                tracing::info!(
                    client_id = %client_id,
                    fragments = reply.fragments,
                    audio_frames = reply.audio_frames,
                    history_len = history.len(),
                    "turn complete"
                );
                self.send(ServerEvent::Complete {
                    reply: reply.text,
                    history,
                })
                .await;
            }
            Err(e) => {
                tracing::warn!(client_id = %client_id, stage = e.stage(), "turn failed: {}", e);
                self.send(ServerEvent::error(e.to_string())).await;
            }
        }
    }

    async fn stream_reply(&self, prompt: &[ChatMessage]) -> Result<AssistantReply, VoiceError> {
        let mut fragments = self.services.stream_reply(prompt).await?;
        let mut trigger = SynthesisTrigger::new(TriggerPolicy::from(self.agent.as_ref()));
        let mut synthesis = OrderedSynthesis::start(
            self.services.clone(),
            self.session.synthesis_permits.clone(),
            self.registry.clone(),
            self.session.client_id().to_string(),
        );

        let mut text = String::new();
        let mut count = 0;
        while let Some(fragment) = fragments.next().await {
            let fragment = match fragment {
                Ok(fragment) => fragment,
                Err(e) => {
                    synthesis.abort();
                    return Err(e);
                }
            };
            if synthesis.has_failed() {
                break;
            }
            if fragment.is_empty() {
                continue;
            }

            count += 1;
            text.push_str(&fragment);
            self.send(ServerEvent::LlmChunk {
                chunk: fragment.clone(),
                text_so_far: text.clone(),
            })
            .await;

            if let Some(unit) = trigger.push(&fragment) {
                synthesis.dispatch(unit);
            }
        }

        if let Some(rest) = trigger.flush() {
            synthesis.dispatch(rest);
        }
        let audio_frames = synthesis.finish().await?;

        Ok(AssistantReply {
            text,
            fragments: count,
            audio_frames,
        })
    }

    /// Transcribes in-progress audio and, for a new non-empty transcription,
    /// voices the start of a speculative reply. Failures are only logged.
    pub async fn run_partial(&self, chunks: Vec<Bytes>) {
        let client_id = self.session.client_id();
        let audio = concat(&chunks);

        let transcription = match self.services.transcribe(&audio).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(client_id = %client_id, "partial transcription failed: {}", e);
                return;
            }
        };
        if transcription.trim().is_empty() {
            return;
        }

        let fresh = self.session.note_partial(&transcription);
        self.send(ServerEvent::PartialTranscription {
            transcription: transcription.clone(),
        })
        .await;

        if !fresh || !self.agent.early_response {
            return;
        }

        let history = self.session.history_snapshot().await;
        let prompt = build_prompt(self.agent.persona.as_deref(), &history, &transcription);
        if let Err(e) = self.early_response(&prompt).await {
            tracing::debug!(client_id = %client_id, stage = e.stage(), "early response failed: {}", e);
        }
    }

    /// Streams a reply until enough text exists, then voices it once.
    async fn early_response(&self, prompt: &[ChatMessage]) -> Result<(), VoiceError> {
        self.send(ServerEvent::EarlyProcessing).await;

        let mut fragments = self.services.stream_reply(prompt).await?;
        let mut collected = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            collected.push_str(&fragment);

            if collected.chars().count() >= self.agent.early_min_chars || fragment.contains('.') {
                let _permit = self
                    .session
                    .synthesis_permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| VoiceError::Synthesis("synthesis permits closed".to_string()))?;
                let audio = self.services.synthesize(&collected).await?;
                self.registry
                    .send_binary(self.session.client_id(), audio)
                    .await;
                break;
            }
        }
        Ok(())
    }

    async fn send(&self, event: ServerEvent) -> bool {
        self.registry
            .send_text(self.session.client_id(), event.to_json())
            .await
    }
}
