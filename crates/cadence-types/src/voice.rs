//! Conversation message types.
//!
//! A conversation is an ordered list of [`ChatMessage`]s. Only `user` and
//! `assistant` turns are ever kept in a session's history; the `system`
//! role exists so a persona message can lead a prompt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Persona / instruction message leading a prompt.
    System,
    /// A user turn.
    User,
    /// An assistant turn.
    Assistant,
}

impl ChatRole {
    /// Returns the wire label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parses a wire label. Returns `None` for unknown roles.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Whether messages of this role belong in conversation history.
    pub fn is_turn(self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Parses a client-supplied conversation history.
///
/// Accepts either a JSON array of `{role, content}` objects or a string
/// containing such an array encoded as JSON. Entries with a role other than
/// `user`/`assistant`, or without string content, are dropped. Anything that
/// is not an array (after decoding) yields an empty history.
pub fn parse_history(value: &Value) -> Vec<ChatMessage> {
    let decoded;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::String(encoded) => {
            decoded = match serde_json::from_str::<Value>(encoded) {
                Ok(v) => v,
                Err(_) => return Vec::new(),
            };
            match &decoded {
                Value::Array(entries) => entries,
                _ => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| {
            let role = ChatRole::parse(entry.get("role")?.as_str()?)?;
            if !role.is_turn() {
                return None;
            }
            let content = entry.get("content")?.as_str()?;
            Some(ChatMessage {
                role,
                content: content.to_string(),
            })
        })
        .collect()
}

/// Builds a chat prompt: the optional persona as a leading system message,
/// then the prior turns, then the new user turn.
pub fn build_prompt(
    persona: Option<&str>,
    history: &[ChatMessage],
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(persona) = persona.filter(|p| !p.trim().is_empty()) {
        messages.push(ChatMessage::system(persona));
    }
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(user_text));
    messages
}
