//! Server configuration loading from file and environment variables.

use cadence_types::DEFAULT_ALLOWED_ROLES;
use cadence_voice::ProviderConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bearer token and role settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// AI provider settings.
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Voice agent tuning.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cadence_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Authentication configuration.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret for bearer tokens.
    #[serde(default)]
    pub secret: String,

    /// Lifetime of issued tokens, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Roles allowed to use the voice agent. Empty denies everyone.
    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<String>,

    /// How long a new voice socket may wait before sending its credential.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

/// Voice agent behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Optional system message placed first in every prompt.
    #[serde(default)]
    pub persona: Option<String>,

    /// Buffered chunk count from which partial transcription starts.
    #[serde(default = "default_partial_min_chunks")]
    pub partial_min_chunks: usize,

    /// Whether partial transcriptions start an early chat + speech pass.
    #[serde(default = "default_true")]
    pub early_response: bool,

    /// Concurrent synthesis calls allowed per connection.
    #[serde(default = "default_synthesis_concurrency")]
    pub synthesis_concurrency: usize,

    /// Number of leading reply fragments that use the low threshold.
    #[serde(default = "default_first_tier_fragments")]
    pub first_tier_fragments: usize,

    /// Characters needed to trigger synthesis during the first tier.
    #[serde(default = "default_first_tier_min_chars")]
    pub first_tier_min_chars: usize,

    /// Characters needed to trigger synthesis after the first tier.
    #[serde(default = "default_later_min_chars")]
    pub later_min_chars: usize,

    /// Characters needed before the early pass synthesizes its one chunk.
    #[serde(default = "default_early_min_chars")]
    pub early_min_chars: usize,

    /// Upper bound on buffered audio per turn, in bytes.
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: usize,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "cadence.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_token_ttl_secs() -> u64 {
    86_400
}

fn default_allowed_roles() -> Vec<String> {
    DEFAULT_ALLOWED_ROLES.iter().map(|r| r.to_string()).collect()
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_partial_min_chunks() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_synthesis_concurrency() -> usize {
    2
}

fn default_first_tier_fragments() -> usize {
    3
}

fn default_first_tier_min_chars() -> usize {
    3
}

fn default_later_min_chars() -> usize {
    10
}

fn default_early_min_chars() -> usize {
    5
}

fn default_max_audio_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
            allowed_roles: default_allowed_roles(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("allowed_roles", &self.allowed_roles)
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .finish()
    }
}

impl AuthConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            persona: None,
            partial_min_chunks: default_partial_min_chunks(),
            early_response: true,
            synthesis_concurrency: default_synthesis_concurrency(),
            first_tier_fragments: default_first_tier_fragments(),
            first_tier_min_chars: default_first_tier_min_chars(),
            later_min_chars: default_later_min_chars(),
            early_min_chars: default_early_min_chars(),
            max_audio_bytes: default_max_audio_bytes(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CADENCE_HOST` overrides `server.host`
/// - `CADENCE_PORT` overrides `server.port`
/// - `CADENCE_DB_PATH` overrides `database.path`
/// - `CADENCE_LOG_LEVEL` overrides `logging.level`
/// - `CADENCE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CADENCE_JWT_SECRET` overrides `auth.secret`
/// - `CADENCE_PROVIDER_API_KEY` overrides `providers.api_key`
/// - `CADENCE_PROVIDER_API_BASE` overrides `providers.api_base`
/// - `CADENCE_PERSONA` overrides `agent.persona`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

fn apply_env_overrides(mut config: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(host) = var("CADENCE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CADENCE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("CADENCE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("CADENCE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CADENCE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(secret) = var("CADENCE_JWT_SECRET") {
        config.auth.secret = secret;
    }
    if let Some(key) = var("CADENCE_PROVIDER_API_KEY") {
        config.providers.api_key = key;
    }
    if let Some(base) = var("CADENCE_PROVIDER_API_BASE") {
        config.providers.api_base = base;
    }
    if let Some(persona) = var("CADENCE_PERSONA") {
        config.agent.persona = Some(persona).filter(|p| !p.trim().is_empty());
    }
    config
}
