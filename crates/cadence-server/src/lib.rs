//! Cadence server library logic.

pub mod api;
pub mod api_transcripts;
pub mod api_voice;
pub mod api_ws;
pub mod auth;
pub mod config;
pub mod middleware;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transcript_log;

use auth::JwtAuthenticator;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use cadence_db::DbPool;
use cadence_voice::VoiceServices;
use config::{AgentConfig, AuthConfig};
use registry::ConnectionRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transcript_log::TranscriptLog;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Bearer token signer and verifier.
    pub authenticator: JwtAuthenticator,
    /// Role allow-list and handshake settings.
    pub auth: Arc<AuthConfig>,
    /// Voice agent tuning.
    pub agent: Arc<AgentConfig>,
    /// Transcription, chat and speech adapters.
    pub voice: VoiceServices,
    /// Where finalized transcriptions are recorded.
    pub transcripts: Arc<dyn TranscriptLog>,
    /// Live voice sockets by client id.
    pub registry: ConnectionRegistry,
}

/// Maximum request body size (2 MiB). Protects against OOM from oversized payloads.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/voice-agent/chat", post(api_voice::chat_handler))
        .route("/voice-agent/tts-stream", post(api_voice::tts_stream_handler))
        .route(
            "/transcripts/{session_id}",
            get(api_transcripts::list_session_transcripts_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    // Audio uploads need a larger body limit.
    let upload_routes = Router::new()
        .route("/voice-agent/transcribe", post(api_voice::transcribe_handler))
        .layer(DefaultBodyLimit::max(api_voice::MAX_TRANSCRIBE_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ws/voice", get(api_ws::ws_handler))
        .merge(protected_routes)
        .merge(upload_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
