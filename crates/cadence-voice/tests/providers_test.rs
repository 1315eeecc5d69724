use axum::extract::Multipart;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use cadence_types::ChatMessage;
use cadence_voice::{ProviderConfig, VoiceError, VoiceServices};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;

const API_KEY: &str = "test-key";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", API_KEY))
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"message": "invalid api key"}})),
    )
        .into_response()
}

async fn transcriptions(headers: HeaderMap, mut multipart: Multipart) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut size = 0;
    let mut model = String::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => size = field.bytes().await.map(|b| b.len()).unwrap_or(0),
            Some("model") => model = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }
    Json(json!({"text": format!("{} bytes via {}", size, model)})).into_response()
}

async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    assert_eq!(body["stream"], true);
    let last = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();

    let mut sse = String::new();
    sse.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    for word in last.split_inclusive(' ') {
        sse.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": word}}]})
        ));
    }
    sse.push_str("data: [DONE]\n\n");
    ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
}

async fn speech(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let payload = format!(
        "{}|{}|{}",
        body["voice"].as_str().unwrap_or_default(),
        body["speed"],
        body["input"].as_str().unwrap_or_default()
    );
    ([(header::CONTENT_TYPE, "audio/mpeg")], payload).into_response()
}

async fn setup_provider() -> SocketAddr {
    let app = Router::new()
        .route("/v1/audio/transcriptions", post(transcriptions))
        .route("/v1/chat/completions", post(completions))
        .route("/v1/audio/speech", post(speech));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr, api_key: &str) -> ProviderConfig {
    ProviderConfig {
        api_base: format!("http://{}/v1", addr),
        api_key: api_key.to_string(),
        speed: 1.5,
        ..ProviderConfig::default()
    }
}

#[tokio::test]
async fn transcription_uploads_audio_as_multipart() {
    let addr = setup_provider().await;
    let services = VoiceServices::from_config(&config(addr, API_KEY)).unwrap();

    let text = services.transcribe(&[7u8; 40]).await.unwrap();
    assert_eq!(text, "40 bytes via whisper-1");
}

#[tokio::test]
async fn chat_stream_yields_fragments_in_order() {
    let addr = setup_provider().await;
    let services = VoiceServices::from_config(&config(addr, API_KEY)).unwrap();
    let messages = vec![
        ChatMessage::system("be brief"),
        ChatMessage::user("one two three"),
    ];

    let fragments: Vec<String> = services
        .stream_reply(&messages)
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(fragments, vec!["one ", "two ", "three"]);

    let full = services.reply(&messages).await.unwrap();
    assert_eq!(full, "one two three");
}

#[tokio::test]
async fn speech_uses_configured_voice_and_speed() {
    let addr = setup_provider().await;
    let services = VoiceServices::from_config(&config(addr, API_KEY)).unwrap();

    let audio = services.synthesize("Bonjour").await.unwrap();
    assert_eq!(String::from_utf8(audio).unwrap(), "alloy|1.5|Bonjour");

    let streamed: Vec<u8> = services
        .synthesize_stream("Salut")
        .await
        .unwrap()
        .map(|r| r.unwrap().to_vec())
        .concat()
        .await;
    assert_eq!(String::from_utf8(streamed).unwrap(), "alloy|1.5|Salut");
}

#[tokio::test]
async fn provider_errors_map_to_adapter_errors() {
    let addr = setup_provider().await;
    let services = VoiceServices::from_config(&config(addr, "wrong-key")).unwrap();

    match services.transcribe(b"abc").await {
        Err(VoiceError::Transcription(msg)) => assert!(msg.contains("invalid api key")),
        other => panic!("expected transcription error, got {:?}", other),
    }
    match services.stream_reply(&[ChatMessage::user("hi")]).await {
        Err(VoiceError::Chat(msg)) => assert!(msg.contains("401")),
        Err(other) => panic!("expected chat error, got {:?}", other),
        Ok(_) => panic!("expected chat error, got a stream"),
    }
    match services.synthesize("hi").await {
        Err(e) => assert_eq!(e.stage(), "synthesis"),
        Ok(_) => panic!("expected synthesis error"),
    }
}

#[test]
fn provider_config_parses_from_toml() {
    let config: ProviderConfig = toml::from_str(
        r#"
        api_key = "sk-123"
        voice = "nova"
        "#,
    )
    .unwrap();
    assert_eq!(config.voice, "nova");
    assert_eq!(config.chat_model, "gpt-4o-mini");
    assert!((config.speed - 1.2).abs() < f32::EPSILON);
}
