//! Shared plumbing for the HTTP provider adapters.

use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::VoiceError;

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// Builds the HTTP client shared by all adapters.
pub(crate) fn build_client(config: &ProviderConfig) -> Result<reqwest::Client, VoiceError> {
    reqwest::Client::builder()
        .connect_timeout(config.request_timeout())
        .build()
        .map_err(|e| VoiceError::Config(format!("failed to build http client: {}", e)))
}

/// Turns a non-success response into a readable message, preferring the
/// provider's own `{"error": {"message": ...}}` body when present.
pub(crate) async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ProviderErrorBody>(&body) {
        Ok(parsed) => format!("provider error ({}): {}", status, parsed.error.message),
        Err(_) => format!("provider error ({}): {}", status, body),
    }
}
