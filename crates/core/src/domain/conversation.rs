use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        })
    }
}

/// One immutable turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub user_id: i64,
    pub session_id: String,
    pub messages: Vec<Message>,
    pub summary: Option<String>,
    pub last_accessed: DateTime<Utc>,
}

impl ConversationMemory {
    /// Stable identifier used to key embeddings for this session.
    pub fn conversation_id(&self) -> String {
        conversation_id(self.user_id, &self.session_id)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|m| m.timestamp)
    }
}

pub fn conversation_id(user_id: i64, session_id: &str) -> String {
    format!("{user_id}:{session_id}")
}

/// Messages must be non-decreasing in timestamp.
pub fn is_time_ordered(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp)
}
