//! Shared types for the Cadence voice-agent platform.
//!
//! This crate provides the value types used across all Cadence crates:
//! conversation roles and messages, the authenticated identity resolved from
//! a bearer token, persisted transcript records, and the single role check
//! used to gate every endpoint.
//!
//! No crate in the workspace depends on anything *except* `cadence-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};

mod policy;
pub mod voice;

pub use policy::{check_role, DEFAULT_ALLOWED_ROLES};
pub use voice::{build_prompt, parse_history, ChatMessage, ChatRole};

/// An authenticated user, as resolved from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier. Used as the connection `client_id`.
    pub user_id: String,
    /// The email address carried in the token `sub` claim.
    pub email: String,
    /// Role labels held by the user (e.g. `"SuperAdmin"`).
    pub roles: Vec<String>,
}

impl Identity {
    /// Returns `true` if the identity holds the given role label.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A finalized transcription persisted to the transcript log.
///
/// Records are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    /// Unique record ID (UUID v4).
    pub id: String,
    /// The voice session the transcription belongs to.
    pub session_id: String,
    /// The user who spoke.
    pub user_id: String,
    /// The transcribed text (possibly empty).
    pub text: String,
    /// Creation timestamp (RFC 3339, UTC).
    pub timestamp: String,
}
