//! Message and conversation domain types.
//!
//! A conversation is an append-only log of [`Message`]s. Messages are never
//! edited after they are stored; removing one sets its soft-delete flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The AI assistant
    Assistant,
    /// The end user
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::User => "user",
        }
    }

    /// Parse a stored role name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "assistant" => Some(Role::Assistant),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned ID; increases with insertion order
    pub id: i64,

    /// Conversation this turn belongs to
    pub conversation_id: ConversationId,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub text: String,

    /// When the message was stored
    pub created_at: DateTime<Utc>,

    /// Soft-delete flag; deleted messages are excluded from loads
    #[serde(default)]
    pub is_deleted: bool,
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub role: Role,
    pub text: String,
}

impl NewMessage {
    pub fn new(conversation_id: ConversationId, role: Role, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role,
            text: text.into(),
        }
    }

    /// Create a new user message.
    pub fn user(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, text)
    }

    /// Create a new assistant message.
    pub fn assistant(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, text)
    }

    /// Create a new system message.
    pub fn system(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::System, text)
    }
}
